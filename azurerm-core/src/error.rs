//! Error type shared by providers, the poller and the interpreter

use std::fmt;

use crate::resource::ResourceAddress;

/// Classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The remote resource does not exist
    NotFound,
    /// A live resource already occupies the target identity
    AlreadyExists,
    /// The control plane (or local schema) rejected the parameters
    Validation,
    /// Network or authentication failure
    Transport,
    /// The poll budget was exhausted before a terminal state
    PollTimeout,
    /// The orchestrator cancelled the operation
    Cancelled,
    /// The control plane reported a failure
    Remote,
    /// An identifier could not be parsed
    InvalidId,
    /// Named lock misuse
    Lock,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::Validation => "validation failed",
            ErrorKind::Transport => "transport failure",
            ErrorKind::PollTimeout => "timed out",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Remote => "remote failure",
            ErrorKind::InvalidId => "invalid identifier",
            ErrorKind::Lock => "lock error",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// What an operation was working on when it failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Human readable kind (e.g., "App Service Extension")
    pub resource_kind: String,
    pub name: String,
    /// Parent scope (e.g., `App Service "web" / Resource Group "rg"`)
    pub scope: String,
}

impl ErrorContext {
    pub fn new(
        resource_kind: impl Into<String>,
        name: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            resource_kind: resource_kind.into(),
            name: name.into(),
            scope: scope.into(),
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.resource_kind, self.name)?;
        if !self.scope.is_empty() {
            write!(f, " ({})", self.scope)?;
        }
        Ok(())
    }
}

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: Option<ErrorContext>,
    pub address: Option<ResourceAddress>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref address) = self.address {
            write!(f, "[{}] ", address)?;
        }
        match self.context {
            Some(ref ctx) => write!(f, "{}: {}", ctx, self.message)?,
            None => write!(f, "{}", self.message)?,
        }
        if let Some(ref cause) = self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
            address: None,
            cause: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Remote, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Error returned when a create-only operation finds a live resource
    pub fn import_as_exists(resource_type: &str, identifier: &str) -> Self {
        Self::already_exists(format!(
            "A resource with the ID {:?} already exists - to be managed it needs to be imported into the State. Please see the resource documentation for {:?} for more information.",
            identifier, resource_type
        ))
    }

    pub fn for_resource(mut self, address: ResourceAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// Attach operation context unless a more specific one is already set
    pub fn with_context(mut self, context: &ErrorContext) -> Self {
        if self.context.is_none() {
            self.context = Some(context.clone());
        }
        self
    }

    /// Prefix the message with what was being attempted
    pub fn while_doing(mut self, action: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", action, self.message);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context_and_address() {
        let ctx = ErrorContext::new(
            "App Service Extension",
            "ext",
            "App Service \"web\" / Resource Group \"rg\"",
        );
        let err = ProviderError::remote("boom")
            .while_doing("creating")
            .with_context(&ctx)
            .for_resource(ResourceAddress::new("azurerm_app_service_extension", "e"));

        assert_eq!(
            err.to_string(),
            "[azurerm_app_service_extension.e] App Service Extension \"ext\" (App Service \"web\" / Resource Group \"rg\"): creating: boom"
        );
    }

    #[test]
    fn first_context_wins() {
        let inner = ErrorContext::new("Namespace", "ns", "");
        let outer = ErrorContext::new("Geo DR Configuration", "dr", "");
        let err = ProviderError::not_found("gone")
            .with_context(&inner)
            .with_context(&outer);

        assert_eq!(err.context, Some(inner));
        assert!(err.is_not_found());
    }
}
