use std::net::IpAddr;
use std::num::ParseIntError;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("no LoadBalancer IP attached to service {0}")]
    NoLoadBalancerIp(String),

    #[error("invalid LoadBalancer IP: '{0}'")]
    InvalidLoadBalancerIp(String),

    #[error("providerID of node '{0}' is not set")]
    ProviderIdUnset(String),

    #[error("providerID '{provider_id}' of node '{node}' has no '{prefix}' prefix")]
    UnexpectedProviderScheme {
        node: String,
        provider_id: String,
        prefix: &'static str,
    },

    #[error("malformed providerID '{provider_id}' of node '{node}': {source}")]
    MalformedProviderId {
        node: String,
        provider_id: String,
        #[source]
        source: ParseIntError,
    },

    #[error("no floating IP with IP {0} found")]
    FloatingIpNotFound(IpAddr),

    #[error("Kubernetes error: {0}")]
    KubernetesError(#[from] kube::Error),

    #[error("cloud API error: {0}")]
    CloudApi(#[source] BoxError),
}

/// Coarse classification used for log fields and metric labels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unparseable address or provider ID
    InputMalformed,
    /// No LoadBalancer address yet, or no matching floating IP
    NotFound,
    /// A Kubernetes or cloud API call failed
    ExternalCall,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InputMalformed => "input_malformed",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ExternalCall => "external_call",
        }
    }
}

impl CoreError {
    /// Wrap an error returned by a cloud client
    pub fn cloud<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        CoreError::CloudApi(Box::new(err))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidLoadBalancerIp(_)
            | CoreError::ProviderIdUnset(_)
            | CoreError::UnexpectedProviderScheme { .. }
            | CoreError::MalformedProviderId { .. } => ErrorKind::InputMalformed,
            CoreError::NoLoadBalancerIp(_) | CoreError::FloatingIpNotFound(_) => {
                ErrorKind::NotFound
            }
            CoreError::KubernetesError(_) | CoreError::CloudApi(_) => ErrorKind::ExternalCall,
        }
    }
}
