/// Location and time range of one chunk of samples belonging to a series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ChunkMeta {
    pub chunk_ref: u64,
    pub min_time: i64,
    pub max_time: i64,
}

impl ChunkMeta {
    pub fn new(chunk_ref: u64, min_time: i64, max_time: i64) -> Self {
        Self {
            chunk_ref,
            min_time,
            max_time,
        }
    }
}
