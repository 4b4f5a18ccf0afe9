/// Tunables of [`crate::recover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Bytes below the lowest observed stack address kept in every frame.
    pub redzone: u64,
    /// Upper bound on pointer-arithmetic rewrite rounds.
    pub max_rewrite_rounds: usize,
    /// Name prefix shared by all memory-access intrinsics.
    pub intrinsic_prefix: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            redzone: 128,
            max_rewrite_rounds: 64,
            intrinsic_prefix: "__relift_".to_string(),
        }
    }
}
