use thiserror::Error;

use crate::model::ProbeRef;

#[derive(Error, Debug)]
pub enum MadoError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Invalid mpd file: {0}")]
    MpdParsing(String),

    #[error("No period found in manifest")]
    NoPeriodFound,

    #[error("A different period with id {found:?} found, previous period id was {expected:?}")]
    PeriodIdChanged {
        expected: Option<String>,
        found: Option<String>,
    },

    #[error("Open-ended SegmentTimeline run (S@r = {repeat}) in representation {representation:?} is not supported")]
    OpenEndedTimeline {
        representation: Option<String>,
        repeat: i64,
    },

    #[error("Unsupported addressing mode: {0}")]
    UnsupportedAddressing(String),

    #[error("No segment check matches probe {0}")]
    UnmatchedProbe(ProbeRef),

    #[error("Probe {0} already has an outcome")]
    DuplicateCompletion(ProbeRef),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    MpdParseError(#[from] dash_mpd::DashMpdError),

    #[error(transparent)]
    DurationOutOfRange(#[from] chrono::OutOfRangeError),

    #[error(transparent)]
    DateTimeParsing(#[from] chrono::ParseError),
}

impl MadoError {
    /// Errors after which the availability arithmetic can not be continued safely.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OpenEndedTimeline { .. }
                | Self::PeriodIdChanged { .. }
                | Self::UnsupportedAddressing(_)
        )
    }
}

pub type MadoResult<T> = Result<T, MadoError>;
