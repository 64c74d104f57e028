use super::records::{InteropError, InteropRecord};
use super::sink::{DataSink, SinkError};
use bytemuck::Pod;
use std::collections::BTreeMap;
use std::mem::size_of;

/// Type discriminator written into every blob header.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlobKind {
    LatticeInfo = 1,
    PairDefinitions = 2,
    ClusterDefinitions = 3,
    PairTable = 4,
    ClusterTable = 5,
    OccupationCodes = 6,
    ParticleTableBuffer = 7,
    JumpDirections = 8,
    JumpLinks = 9,
    MoveVectors = 10,
    GlobalMoves = 11,
    JumpRules = 12,
    JumpCounts = 13,
    JumpAssign = 14,
}

impl BlobKind {
    pub const ALL: [BlobKind; 14] = [
        BlobKind::LatticeInfo,
        BlobKind::PairDefinitions,
        BlobKind::ClusterDefinitions,
        BlobKind::PairTable,
        BlobKind::ClusterTable,
        BlobKind::OccupationCodes,
        BlobKind::ParticleTableBuffer,
        BlobKind::JumpDirections,
        BlobKind::JumpLinks,
        BlobKind::MoveVectors,
        BlobKind::GlobalMoves,
        BlobKind::JumpRules,
        BlobKind::JumpCounts,
        BlobKind::JumpAssign,
    ];

    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn from_tag(tag: u32) -> Result<Self, InteropError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.tag() == tag)
            .ok_or(InteropError::UnknownTypeTag(tag))
    }

    /// Key segment used when storing blobs of this kind.
    pub fn name(self) -> &'static str {
        match self {
            BlobKind::LatticeInfo => "lattice-info",
            BlobKind::PairDefinitions => "pair-definitions",
            BlobKind::ClusterDefinitions => "cluster-definitions",
            BlobKind::PairTable => "pair-table",
            BlobKind::ClusterTable => "cluster-table",
            BlobKind::OccupationCodes => "occupation-codes",
            BlobKind::ParticleTableBuffer => "particle-table-buffer",
            BlobKind::JumpDirections => "jump-directions",
            BlobKind::JumpLinks => "jump-links",
            BlobKind::MoveVectors => "move-vectors",
            BlobKind::GlobalMoves => "global-moves",
            BlobKind::JumpRules => "jump-rules",
            BlobKind::JumpCounts => "jump-counts",
            BlobKind::JumpAssign => "jump-assign",
        }
    }
}

/// Metadata preceding every payload. All header fields are little-endian.
///
/// | offset | field |
/// |---|---|
/// | 0 | type tag (`u32`) |
/// | 4 | element size in bytes (`i32`) |
/// | 8 | rank (`i32`) |
/// | 12 | element count (`i32`) |
/// | 16 | `rank - 1` index skips (`i32` each) |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHeader {
    pub kind: BlobKind,
    pub element_size: i32,
    pub rank: i32,
    pub count: i32,
    pub index_skips: Vec<i32>,
}

impl BlobHeader {
    const FIXED_SIZE: usize = 16;

    pub fn size(&self) -> usize {
        Self::FIXED_SIZE + 4 * self.index_skips.len()
    }

    pub fn payload_size(&self) -> usize {
        self.element_size.max(0) as usize * self.count.max(0) as usize
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size());
        bytes.extend_from_slice(&self.kind.tag().to_le_bytes());
        bytes.extend_from_slice(&self.element_size.to_le_bytes());
        bytes.extend_from_slice(&self.rank.to_le_bytes());
        bytes.extend_from_slice(&self.count.to_le_bytes());
        for skip in &self.index_skips {
            bytes.extend_from_slice(&skip.to_le_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InteropError> {
        let read = |offset: usize| -> Result<[u8; 4], InteropError> {
            bytes
                .get(offset..offset + 4)
                .and_then(|slice| slice.try_into().ok())
                .ok_or_else(|| {
                    InteropError::CorruptHeader(format!("truncated at offset {offset}"))
                })
        };
        let kind = BlobKind::from_tag(u32::from_le_bytes(read(0)?))?;
        let element_size = i32::from_le_bytes(read(4)?);
        let rank = i32::from_le_bytes(read(8)?);
        let count = i32::from_le_bytes(read(12)?);
        if rank < 1 || element_size < 1 || count < 0 {
            return Err(InteropError::CorruptHeader(format!(
                "rank {rank}, element size {element_size}, count {count}"
            )));
        }
        let index_skips = (0..rank as usize - 1)
            .map(|i| read(Self::FIXED_SIZE + 4 * i).map(i32::from_le_bytes))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            kind,
            element_size,
            rank,
            count,
            index_skips,
        })
    }
}

/// One header plus payload unit as consumed by the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    header: BlobHeader,
    payload: Vec<u8>,
}

impl Blob {
    /// A rank-1 blob of fixed-size records.
    pub fn from_records<R: InteropRecord>(kind: BlobKind, records: &[R]) -> Result<Self, InteropError> {
        let mut payload = Vec::with_capacity(records.len() * R::SIZE);
        for record in records {
            payload.extend_from_slice(&record.encode()?);
        }
        Ok(Self {
            header: BlobHeader {
                kind,
                element_size: R::SIZE as i32,
                rank: 1,
                count: records.len() as i32,
                index_skips: Vec::new(),
            },
            payload,
        })
    }

    /// A row-major table of plain values with the given dimensions.
    pub fn from_table<T: Pod>(
        kind: BlobKind,
        dimensions: &[usize],
        values: &[T],
    ) -> Result<Self, InteropError> {
        let count: usize = dimensions.iter().product();
        if dimensions.is_empty() || count != values.len() {
            return Err(InteropError::LengthMismatch {
                expected: count,
                actual: values.len(),
            });
        }
        let index_skips = (1..dimensions.len())
            .map(|k| dimensions[k..].iter().product::<usize>() as i32)
            .collect();
        Ok(Self {
            header: BlobHeader {
                kind,
                element_size: size_of::<T>() as i32,
                rank: dimensions.len() as i32,
                count: count as i32,
                index_skips,
            },
            payload: bytemuck::cast_slice::<T, u8>(values).to_vec(),
        })
    }

    pub fn header(&self) -> &BlobHeader {
        &self.header
    }

    pub fn kind(&self) -> BlobKind {
        self.header.kind
    }

    pub fn header_bytes(&self) -> Vec<u8> {
        self.header.to_bytes()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.header_bytes();
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parses a stored blob, checking that the total length equals header plus payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, InteropError> {
        let header = BlobHeader::from_bytes(bytes)?;
        let expected = header.size() + header.payload_size();
        if bytes.len() != expected {
            return Err(InteropError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let payload = bytes[header.size()..].to_vec();
        Ok(Self { header, payload })
    }

    pub fn records<R: InteropRecord>(&self) -> Result<Vec<R>, InteropError> {
        if self.header.element_size as usize != R::SIZE {
            return Err(InteropError::ElementMismatch {
                kind: self.header.kind.name(),
                element_size: R::SIZE,
            });
        }
        self.payload.chunks_exact(R::SIZE).map(R::decode).collect()
    }

    pub fn values<T: Pod>(&self) -> Result<Vec<T>, InteropError> {
        let size = size_of::<T>();
        if self.header.element_size as usize != size {
            return Err(InteropError::ElementMismatch {
                kind: self.header.kind.name(),
                element_size: size,
            });
        }
        Ok(self
            .payload
            .chunks_exact(size)
            .map(|chunk| bytemuck::pod_read_unaligned::<T>(chunk))
            .collect())
    }

    /// Table dimensions reconstructed from the count and index skips.
    pub fn dimensions(&self) -> Vec<usize> {
        let count = self.header.count.max(0) as usize;
        let skips: Vec<usize> = self
            .header
            .index_skips
            .iter()
            .map(|s| (*s).max(0) as usize)
            .collect();
        let Some(&first) = skips.first() else {
            return vec![count];
        };
        let mut dims = Vec::with_capacity(skips.len() + 1);
        dims.push(count.checked_div(first).unwrap_or(0));
        for pair in skips.windows(2) {
            dims.push(pair[0].checked_div(pair[1]).unwrap_or(0));
        }
        dims.push(skips[skips.len() - 1]);
        dims
    }
}

/// All blobs of one simulation, keyed by their storage key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobSet {
    blobs: BTreeMap<String, Blob>,
}

impl BlobSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, blob: Blob) {
        self.blobs.insert(key.into(), blob);
    }

    pub fn get(&self, key: &str) -> Option<&Blob> {
        self.blobs.get(key)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Blob)> {
        self.blobs.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.blobs.keys()
    }

    pub fn total_bytes(&self) -> usize {
        self.blobs
            .values()
            .map(|blob| blob.header.size() + blob.payload.len())
            .sum()
    }

    /// Stages every blob in `sink`. The caller commits or aborts.
    pub fn store_into<S: DataSink + ?Sized>(&self, sink: &mut S) -> Result<(), SinkError> {
        for (key, blob) in &self.blobs {
            sink.store(key, &blob.header_bytes(), blob.payload())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::interop::records::JumpLinkRecord;

    #[test]
    fn record_blob_survives_byte_round_trip() {
        let links = [
            JumpLinkRecord { path_id: 0, link_id: 3 },
            JumpLinkRecord { path_id: 1, link_id: 4 },
        ];
        let blob = Blob::from_records(BlobKind::JumpLinks, &links).unwrap();
        assert_eq!(blob.header().size(), 16);
        let bytes = blob.to_bytes();
        assert_eq!(bytes.len(), 16 + 16);
        let parsed = Blob::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.records::<JumpLinkRecord>().unwrap(), links);
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn table_header_carries_index_skips() {
        let values: Vec<i32> = (0..24).collect();
        let blob = Blob::from_table(BlobKind::JumpAssign, &[2, 3, 4], &values).unwrap();
        assert_eq!(blob.header().rank, 3);
        assert_eq!(blob.header().index_skips, vec![12, 4]);
        assert_eq!(blob.header().size(), 24);
        assert_eq!(blob.dimensions(), vec![2, 3, 4]);
        assert_eq!(blob.values::<i32>().unwrap(), values);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let blob = Blob::from_table(BlobKind::PairTable, &[2, 2], &[0.0f64; 4]).unwrap();
        let mut bytes = blob.to_bytes();
        bytes.pop();
        assert!(matches!(
            Blob::from_bytes(&bytes),
            Err(InteropError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut bytes = Blob::from_table(BlobKind::JumpCounts, &[1], &[1i32])
            .unwrap()
            .to_bytes();
        bytes[0] = 99;
        assert_eq!(Blob::from_bytes(&bytes), Err(InteropError::UnknownTypeTag(99)));
    }

    #[test]
    fn table_with_wrong_length_is_rejected() {
        let result = Blob::from_table(BlobKind::PairTable, &[2, 2], &[0.0f64; 3]);
        assert_eq!(
            result,
            Err(InteropError::LengthMismatch {
                expected: 4,
                actual: 3
            })
        );
    }
}
