//! Decision optimizers: transfers, full-squad rebuilds, formation and
//! chip timing.

pub mod chips;
pub mod formation;
pub mod squad;
pub mod transfers;

pub use chips::ChipStrategist;
pub use squad::{OptimizedSquad, SquadOptimizer};
pub use transfers::{
    MultiGwPredictions, TransferAction, TransferOptimizer, TransferOption, TransferPlan,
};
