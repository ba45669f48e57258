use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmissorError {
    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Schema error: {message}")]
    SchemaError { message: String },

    #[error("Signing error: {message}")]
    SigningError { message: String },

    #[error("Transport failed after {attempts} attempt(s): {message}")]
    TransportError { attempts: u32, message: String },

    #[error("Remote rejected request with HTTP {status}: {body}")]
    RemoteRejection { status: u16, body: String },

    #[error("XML error: {message}")]
    XmlError { message: String },

    #[error("HTTP client error: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field '{field}'")]
    MissingConfigError { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Document,
    Signature,
    Network,
    Remote,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// Process exit code for a run aborted by an error of this severity.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

impl EmissorError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::SchemaError {
            message: message.into(),
        }
    }

    pub fn signing(message: impl Into<String>) -> Self {
        Self::SigningError {
            message: message.into(),
        }
    }

    pub fn xml(message: impl Into<String>) -> Self {
        Self::XmlError {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ValidationError { .. } | Self::CsvError(_) => ErrorCategory::Input,
            Self::SchemaError { .. } | Self::XmlError { .. } => ErrorCategory::Document,
            Self::SigningError { .. } => ErrorCategory::Signature,
            Self::TransportError { .. } | Self::ApiError(_) => ErrorCategory::Network,
            Self::RemoteRejection { .. } | Self::SerializationError(_) => ErrorCategory::Remote,
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
            Self::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Input
            | ErrorCategory::Document
            | ErrorCategory::Network
            | ErrorCategory::Remote => ErrorSeverity::Medium,
            ErrorCategory::Signature | ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// Only network-level failures are worth another attempt, including a
    /// body cut short after the status line; the transport client is the
    /// single place that acts on this.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApiError(e) => e.is_connect() || e.is_timeout() || e.is_request() || e.is_body(),
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::ValidationError { .. } => "Check the input record: recipient needs exactly one of CPF or CNPJ",
            Self::SchemaError { .. } => "Check the service code (item_lista) and provider identifiers",
            Self::SigningError { .. } => "Check that cert_path and key_path point to a valid, matching PEM pair",
            Self::TransportError { .. } | Self::ApiError(_) => {
                "Check network connectivity and the mutual-TLS certificate, then resubmit"
            }
            Self::RemoteRejection { status, .. } if *status == 401 || *status == 403 => {
                "The authority refused the client certificate; confirm it is registered for this CNPJ"
            }
            Self::RemoteRejection { .. } => "Inspect the response body returned by the authority",
            Self::XmlError { .. } => "The document could not be parsed as XML",
            Self::CsvError(_) => "Check the records file: expected columns cpf,nome,hash",
            Self::IoError(_) => "Check file paths and permissions",
            Self::SerializationError(_) => "The authority returned an unexpected payload",
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => "Review the TOML configuration file",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::TransportError { attempts, .. } => {
                format!("Could not reach the NFS-e API after {} attempt(s)", attempts)
            }
            Self::RemoteRejection { status, .. } => {
                format!("The NFS-e API rejected the request (HTTP {})", status)
            }
            Self::SigningError { .. } => "The document could not be signed".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EmissorError>;
