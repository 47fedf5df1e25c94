//! Key-to-partition routing for the in-memory broker
//!
//! Keyed records hash with murmur2 (`KAFKA_SEED`), the same function the Java
//! client's default partitioner uses, so a key always lands on one partition
//! for a fixed partition count. Null keys pick a random partition, which is
//! what librdkafka's `consistent_random` strategy does.

use murmur2::{murmur2, KAFKA_SEED};
use rand::Rng;

use super::error::{DeliveryError, DeliveryResult};

/// Pick the partition for a record
///
/// An explicit partition passes through after a range check.
pub fn select_partition(
    topic: &str,
    key: Option<&[u8]>,
    partition_count: i32,
    explicit: Option<i32>,
) -> DeliveryResult<i32> {
    if partition_count <= 0 {
        return Err(DeliveryError::Fatal(format!(
            "topic {} has no partitions",
            topic
        )));
    }

    if let Some(partition) = explicit {
        if partition < 0 || partition >= partition_count {
            return Err(DeliveryError::Fatal(format!(
                "partition {} out of range for {} ({} partitions)",
                partition, topic, partition_count
            )));
        }
        return Ok(partition);
    }

    Ok(match key {
        Some(k) => hash_partition(k, partition_count),
        None => rand::thread_rng().gen_range(0..partition_count),
    })
}

/// murmur2 with the sign bit masked, modulo partition count
pub fn hash_partition(key: &[u8], partition_count: i32) -> i32 {
    let hash = murmur2(key, KAFKA_SEED);
    ((hash & 0x7fffffff) as i32) % partition_count
}
