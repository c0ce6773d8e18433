use tracing::error;
use tracing::info;

use crate::traits::DurableLog;
use crate::types::GroupCreation;

/// Make sure the consumer group exists. A new group starts at the current tail of the stream, so whatever was
/// appended before it existed is never delivered to it.
///
/// Returns `false` if the group couldn't be created or verified. The failure is logged here and not retried.
pub async fn ensure_group<L: DurableLog + ?Sized>(log: &L, stream: &str, group: &str) -> bool {
    match log.create_group(stream, group).await {
        Ok(GroupCreation::Created) => {
            info!(stream, group, "created consumer group at stream tail");
            true
        }
        Ok(GroupCreation::Existed) => {
            info!(stream, group, "consumer group already exists");
            true
        }
        Err(err) => {
            error!(stream, group, error = %err, "failed to create consumer group; cache stays cold");
            false
        }
    }
}
