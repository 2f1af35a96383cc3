//! Risk management: stake sizing and session stop rules

pub mod staking;
pub mod stop_loss;

pub use staking::{
    build_policy, ArithmeticProgression, BoxedStakingPolicy, ClassicProgression, FlatStaking,
    InverseProgression, SequenceProgression, StakeInfo, StakingPolicy,
};
pub use stop_loss::{SessionStats, StopLossGuard, StopReason, Verdict};
