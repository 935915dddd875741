use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubsetMatchingError {
    #[error("worker thread id {tid} exceeds scratch pool size {pool_size}")]
    ThreadIdOverLimit { tid: usize, pool_size: usize },

    #[error("estimator used before prepare() was called")]
    NotPrepared,

    #[error("reference/target images not attached")]
    ImagesNotSet,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("failed to build worker thread pool: {0}")]
    ThreadPoolBuild(String),
}

pub type Result<T> = std::result::Result<T, SubsetMatchingError>;
