#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("event channel driver has stopped")]
    Stopped,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
