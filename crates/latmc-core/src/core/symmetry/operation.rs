use crate::core::utils::comparer::NumericComparer;
use crate::core::utils::geometry::trim_to_unit_cell;
use nalgebra::{Matrix3, Vector3};
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SymmetryError {
    #[error("Invalid symmetry operation literal '{literal}': {reason}")]
    InvalidLiteral { literal: String, reason: String },

    #[error("Space group '{group}' defines no operations")]
    EmptyGroup { group: String },

    #[error("Space group '{group}' does not contain the identity operation")]
    MissingIdentity { group: String },

    #[error("Operation '{literal}' has rotation determinant {determinant}, expected +1 or -1")]
    InvalidRotation { literal: String, determinant: f64 },
}

/// An affine symmetry operation acting on fractional coordinates: `r' = R r + t`.
#[derive(Debug, Clone, PartialEq)]
pub struct SymmetryOperation {
    literal: String,
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
}

impl SymmetryOperation {
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let literal = format_literal(&rotation, &translation);
        Self {
            literal,
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity(), Vector3::zeros())
    }

    /// Parses the crystallographic notation used by the International Tables, for example
    /// `"-x+1/2,y,z"` or `"x-y, x, z+0.5"`.
    pub fn parse(literal: &str) -> Result<Self, SymmetryError> {
        let components: Vec<&str> = literal.split(',').collect();
        if components.len() != 3 {
            return Err(SymmetryError::InvalidLiteral {
                literal: literal.to_string(),
                reason: format!("expected 3 components, found {}", components.len()),
            });
        }

        let mut rotation = Matrix3::zeros();
        let mut translation = Vector3::zeros();
        for (row, component) in components.iter().enumerate() {
            let (coefficients, constant) =
                parse_component(component).map_err(|reason| SymmetryError::InvalidLiteral {
                    literal: literal.to_string(),
                    reason,
                })?;
            for (col, value) in coefficients.iter().enumerate() {
                rotation[(row, col)] = *value;
            }
            translation[row] = constant;
        }

        Ok(Self {
            literal: literal.split_whitespace().collect(),
            rotation,
            translation,
        })
    }

    pub fn literal(&self) -> &str {
        &self.literal
    }

    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    pub fn determinant(&self) -> f64 {
        self.rotation.determinant()
    }

    /// Applies the operation without mapping the result back into the unit cell.
    #[inline]
    pub fn apply(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * vector + self.translation
    }

    pub fn apply_trimmed(&self, vector: &Vector3<f64>, comparer: &NumericComparer) -> Vector3<f64> {
        trim_to_unit_cell(&self.apply(vector), comparer)
    }

    pub fn apply_sequence(&self, vectors: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        vectors.iter().map(|v| self.apply(v)).collect()
    }

    /// Returns the operation followed by an additional lattice translation.
    pub fn shifted(&self, shift: &Vector3<f64>) -> Self {
        Self::new(self.rotation, self.translation + shift)
    }

    pub fn is_identity(&self, comparer: &NumericComparer) -> bool {
        let rotation_ok = (self.rotation - Matrix3::identity())
            .iter()
            .all(|v| comparer.is_zero(*v));
        rotation_ok && comparer.is_zero_vector(&self.translation)
    }
}

impl fmt::Display for SymmetryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.literal)
    }
}

fn parse_component(text: &str) -> Result<([f64; 3], f64), String> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    if compact.is_empty() {
        return Err("empty component".to_string());
    }

    let mut coefficients = [0.0; 3];
    let mut constant = 0.0;
    let mut chars = compact.chars().peekable();

    while chars.peek().is_some() {
        let mut sign = 1.0;
        while let Some(&c) = chars.peek() {
            match c {
                '+' => {
                    chars.next();
                }
                '-' => {
                    sign = -sign;
                    chars.next();
                }
                _ => break,
            }
        }

        let number = read_number(&mut chars)?;
        match chars.peek().copied() {
            Some(axis @ ('x' | 'y' | 'z')) => {
                chars.next();
                let index = (axis as u8 - b'x') as usize;
                coefficients[index] += sign * number.unwrap_or(1.0);
            }
            Some(other) if number.is_none() => {
                return Err(format!("unexpected character '{other}'"));
            }
            None if number.is_none() => {
                return Err("dangling sign".to_string());
            }
            _ => {
                if let Some(value) = number {
                    constant += sign * value;
                }
            }
        }
    }

    Ok((coefficients, constant))
}

fn read_number(chars: &mut Peekable<Chars<'_>>) -> Result<Option<f64>, String> {
    let numerator = read_digits(chars);
    if numerator.is_empty() {
        return Ok(None);
    }
    let mut value: f64 = numerator
        .parse()
        .map_err(|_| format!("invalid number '{numerator}'"))?;

    if chars.peek() == Some(&'/') {
        chars.next();
        let denominator = read_digits(chars);
        let divisor: f64 = denominator
            .parse()
            .map_err(|_| format!("invalid denominator '{denominator}'"))?;
        if divisor == 0.0 {
            return Err("division by zero".to_string());
        }
        value /= divisor;
    }
    Ok(Some(value))
}

fn read_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() || c == '.' {
            digits.push(c);
            chars.next();
        } else {
            break;
        }
    }
    digits
}

fn format_literal(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> String {
    const AXES: [char; 3] = ['x', 'y', 'z'];
    (0..3)
        .map(|row| {
            let mut text = String::new();
            for (col, axis) in AXES.iter().enumerate() {
                let value = rotation[(row, col)];
                if value.abs() < 1.0e-12 {
                    continue;
                }
                match value {
                    v if (v - 1.0).abs() < 1.0e-12 => text.push_str(&format!("+{axis}")),
                    v if (v + 1.0).abs() < 1.0e-12 => text.push_str(&format!("-{axis}")),
                    v => text.push_str(&format!("{v:+}{axis}")),
                }
            }
            if translation[row].abs() >= 1.0e-12 || text.is_empty() {
                text.push_str(&format!("{:+}", translation[row]));
            }
            text.trim_start_matches('+').to_string()
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_signs_variables_and_fractions() {
        let op = SymmetryOperation::parse("-x+1/2, y, z-0.25").unwrap();
        assert_eq!(op.rotation()[(0, 0)], -1.0);
        assert_eq!(op.rotation()[(1, 1)], 1.0);
        assert_eq!(op.translation(), &Vector3::new(0.5, 0.0, -0.25));
        assert_eq!(op.literal(), "-x+1/2,y,z-0.25");
    }

    #[test]
    fn parse_supports_mixed_axes_in_one_component() {
        let op = SymmetryOperation::parse("x-y,x,z").unwrap();
        assert_eq!(op.rotation()[(0, 0)], 1.0);
        assert_eq!(op.rotation()[(0, 1)], -1.0);
        assert_eq!(op.rotation()[(1, 0)], 1.0);
    }

    #[test]
    fn parse_rejects_malformed_literals() {
        assert!(matches!(
            SymmetryOperation::parse("x,y"),
            Err(SymmetryError::InvalidLiteral { .. })
        ));
        assert!(SymmetryOperation::parse("x,q,z").is_err());
        assert!(SymmetryOperation::parse("x,y,z+1/0").is_err());
        assert!(SymmetryOperation::parse("x,y,-").is_err());
    }

    #[test]
    fn apply_and_trim_map_into_origin_cell() {
        let comparer = NumericComparer::default();
        let op = SymmetryOperation::parse("-x,-y,z+1/2").unwrap();
        let v = Vector3::new(0.25, 0.0, 0.75);
        assert_eq!(op.apply(&v), Vector3::new(-0.25, 0.0, 1.25));
        let trimmed = op.apply_trimmed(&v, &comparer);
        assert!(comparer.vectors_eq(&trimmed, &Vector3::new(0.75, 0.0, 0.25)));
    }

    #[test]
    fn generated_literal_parses_back_to_same_operation() {
        let op = SymmetryOperation::parse("-y+1/2,x,-z").unwrap();
        let shifted = op.shifted(&Vector3::new(1.0, 0.0, -1.0));
        let reparsed = SymmetryOperation::parse(shifted.literal()).unwrap();
        assert_eq!(reparsed.rotation(), shifted.rotation());
        assert_eq!(reparsed.translation(), shifted.translation());
    }

    #[test]
    fn identity_is_detected() {
        let comparer = NumericComparer::default();
        assert!(SymmetryOperation::identity().is_identity(&comparer));
        assert!(!SymmetryOperation::parse("x,y,z+1").unwrap().is_identity(&comparer));
    }
}
