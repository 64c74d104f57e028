#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStage {
    Validation,
    Structure,
    Energy,
    Transition,
    Simulation,
    Translation,
    Persistence,
}

impl BuildStage {
    pub fn name(self) -> &'static str {
        match self {
            BuildStage::Validation => "validation",
            BuildStage::Structure => "structure",
            BuildStage::Energy => "energy",
            BuildStage::Transition => "transition",
            BuildStage::Simulation => "simulation",
            BuildStage::Translation => "translation",
            BuildStage::Persistence => "persistence",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Progress {
    StageStart { stage: BuildStage },
    StageFinish { stage: BuildStage, objects: usize },

    SimulationStart { index: usize },

    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}
