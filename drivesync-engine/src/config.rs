use std::env;

/// Tuning knobs for the executor's deletion policy. Defaults can be
/// overridden through the environment.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Hard cap on quarantine moves per removal batch; everything past it is
    /// hard-deleted.
    pub move_to_temp_limit: usize,
    /// Above this many quarantine candidates the batch policy lists the temp
    /// folder's known checksums first instead of provoking collisions.
    pub optimistic_move_to_temp_threshold: usize,
    /// Name of the quarantine folder, created under the synchronized folder
    /// on demand.
    pub temp_folder_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            move_to_temp_limit: read_limit("DRIVESYNC_MOVE_TO_TEMP_LIMIT", 20),
            optimistic_move_to_temp_threshold: read_limit(
                "DRIVESYNC_OPTIMISTIC_MOVE_TO_TEMP_THRESHOLD",
                5,
            ),
            temp_folder_name: env::var("DRIVESYNC_TEMP_FOLDER")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| ".drivesync-tmp".to_string()),
        }
    }
}

fn read_limit(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
