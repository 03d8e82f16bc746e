use std::fmt;

#[derive(Debug)]
pub enum BadgePressError {
    TemplateDecode(String),
    InvalidConfiguration(String),
    Remote(reqwest::Error),
    RemoteStatus(u16, String),
    Raster(String),
    Pdf(lopdf::Error),
    ExportInFlight,
    ExportCancelled,
    ImportCancelled,
    ExportFailed(String),
    Dispatch(String),
    Io(std::io::Error),
}

impl fmt::Display for BadgePressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BadgePressError::TemplateDecode(message) => {
                write!(f, "template decode error: {}", message)
            }
            BadgePressError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            BadgePressError::Remote(err) => write!(f, "remote call failed: {}", err),
            BadgePressError::RemoteStatus(status, url) => {
                write!(f, "remote call returned {} for {}", status, url)
            }
            BadgePressError::Raster(message) => write!(f, "raster error: {}", message),
            BadgePressError::Pdf(err) => write!(f, "pdf assembly error: {}", err),
            BadgePressError::ExportInFlight => {
                write!(f, "another export is already in flight for this session")
            }
            BadgePressError::ExportCancelled => write!(f, "export was cancelled"),
            BadgePressError::ImportCancelled => write!(f, "import was cancelled"),
            BadgePressError::ExportFailed(message) => write!(f, "export failed: {}", message),
            BadgePressError::Dispatch(message) => write!(f, "dispatch error: {}", message),
            BadgePressError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for BadgePressError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BadgePressError::Remote(err) => Some(err),
            BadgePressError::Pdf(err) => Some(err),
            BadgePressError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BadgePressError {
    fn from(value: std::io::Error) -> Self {
        BadgePressError::Io(value)
    }
}

impl From<reqwest::Error> for BadgePressError {
    fn from(value: reqwest::Error) -> Self {
        BadgePressError::Remote(value)
    }
}

impl From<lopdf::Error> for BadgePressError {
    fn from(value: lopdf::Error) -> Self {
        BadgePressError::Pdf(value)
    }
}

impl From<serde_json::Error> for BadgePressError {
    fn from(value: serde_json::Error) -> Self {
        BadgePressError::TemplateDecode(value.to_string())
    }
}
