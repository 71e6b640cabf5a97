//! # Engine Configuration

/// Tunables for the order engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Consultation timeout applied when the caller does not supply one,
    /// in seconds.
    pub default_consultation_timeout_secs: i64,
    /// Hard cap on the number of timeline events returned by a query.
    pub timeline_query_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // 72 hours to hold a consultation before the sweep expires it.
            default_consultation_timeout_secs: 72 * 3600,
            timeline_query_cap: 100,
        }
    }
}
