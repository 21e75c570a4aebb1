//! Analysis parameters passed explicitly into each stage.

use serde::{Deserialize, Serialize};

use crate::barrier::BarrierKind;

/// Which barrier kinds break networks in a run.
///
/// - `Natural`: waterfalls only.
/// - `Dams`: waterfalls and dams.
/// - `SmallBarriers`: waterfalls, dams and small barriers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Natural,
    Dams,
    SmallBarriers,
}

impl NetworkType {
    pub fn includes(self, kind: BarrierKind) -> bool {
        match self {
            NetworkType::Natural => kind == BarrierKind::Waterfall,
            NetworkType::Dams => kind != BarrierKind::SmallBarrier,
            NetworkType::SmallBarriers => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NetworkType::Natural => "natural",
            NetworkType::Dams => "dams",
            NetworkType::SmallBarriers => "small_barriers",
        }
    }
}

/// Which bounding barriers remove their downstream segment from the
/// free-flowing length of the network that contains it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeFlowPolicy {
    #[default]
    AnyBarrier,
    Kinds(Vec<BarrierKind>),
}

impl FreeFlowPolicy {
    pub fn excludes_below(&self, kind: BarrierKind) -> bool {
        match self {
            FreeFlowPolicy::AnyBarrier => true,
            FreeFlowPolicy::Kinds(kinds) => kinds.contains(&kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub network_type: NetworkType,
    /// Metres. Barriers closer than this to a segment end are placed on the
    /// end; interior barriers closer than this to each other share one cut.
    pub endpoint_tolerance: f64,
    /// Metres. Straight-line distances below this make sinuosity undefined.
    pub degenerate_epsilon: f64,
    /// Drop barriers snapped onto loop segments before cutting.
    pub drop_loop_barriers: bool,
    pub free_flow: FreeFlowPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            network_type: NetworkType::SmallBarriers,
            endpoint_tolerance: 1.0,
            degenerate_epsilon: 1e-6,
            drop_loop_barriers: true,
            free_flow: FreeFlowPolicy::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn with_network_type(mut self, network_type: NetworkType) -> Self {
        self.network_type = network_type;
        self
    }
}
