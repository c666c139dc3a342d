use crate::error::{ExportResult, LmtError, LmtResult};
use crate::export::Message;
use futures_util::future::BoxFuture;
use std::fmt;
use std::str::FromStr;

/// Transport to the message bus. One instance is shared by both streams.
///
/// `send` may be called again with the same message after a failure, so the
/// receiving side must tolerate duplicates.
pub trait Sink: Send + Sync + fmt::Debug {
    /// Open the connection to `topic`. Called once while the pipeline is
    /// built; an error here is a configuration error and is never retried.
    fn connect(&mut self, _connection: &ConnectionString, _topic: &str) -> LmtResult<()> {
        Ok(())
    }

    /// Deliver one message. The whole message succeeds or fails.
    fn send<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, ExportResult>;

    /// Release the connection. Called once at pipeline shutdown.
    fn shutdown(&self) -> LmtResult<()> {
        Ok(())
    }
}

/// Parsed `Key=Value;` connection string of a service bus namespace.
///
/// Must name an `Endpoint` and carry either `SharedAccessKeyName` with
/// `SharedAccessKey`, or a `SharedAccessSignature`.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    endpoint: String,
    shared_access_key_name: Option<String>,
    shared_access_key: Option<String>,
    shared_access_signature: Option<String>,
    entity_path: Option<String>,
}

impl ConnectionString {
    /// Parse and validate a connection string.
    pub fn parse(value: &str) -> LmtResult<Self> {
        if value.trim().is_empty() {
            return Err(LmtError::Configuration(
                "connection string is empty".to_string(),
            ));
        }
        let mut endpoint = None;
        let mut shared_access_key_name = None;
        let mut shared_access_key = None;
        let mut shared_access_signature = None;
        let mut entity_path = None;

        let parts = value.split(';').map(str::trim).filter(|p| !p.is_empty());
        for (position, part) in parts.enumerate() {
            let (key, val) = part.split_once('=').ok_or_else(|| {
                LmtError::Configuration(format!(
                    "connection string segment {} is not a Key=Value pair",
                    position
                ))
            })?;
            let val = val.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(val),
                "sharedaccesskeyname" => shared_access_key_name = Some(val),
                "sharedaccesskey" => shared_access_key = Some(val),
                "sharedaccesssignature" => shared_access_signature = Some(val),
                "entitypath" => entity_path = Some(val),
                _ => {}
            }
        }

        let endpoint = endpoint.filter(|e| !e.is_empty()).ok_or_else(|| {
            LmtError::Configuration("connection string has no Endpoint".to_string())
        })?;
        let has_key = shared_access_key_name.is_some() && shared_access_key.is_some();
        if !has_key && shared_access_signature.is_none() {
            return Err(LmtError::Configuration(
                "connection string has neither a shared access key nor a signature".to_string(),
            ));
        }
        Ok(ConnectionString {
            endpoint,
            shared_access_key_name,
            shared_access_key,
            shared_access_signature,
            entity_path,
        })
    }

    /// Namespace endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Name of the shared access policy, if key based.
    pub fn shared_access_key_name(&self) -> Option<&str> {
        self.shared_access_key_name.as_deref()
    }

    /// The shared access key, if key based.
    pub fn shared_access_key(&self) -> Option<&str> {
        self.shared_access_key.as_deref()
    }

    /// Pre-signed token, if signature based.
    pub fn shared_access_signature(&self) -> Option<&str> {
        self.shared_access_signature.as_deref()
    }

    /// Entity the string is scoped to, if any.
    pub fn entity_path(&self) -> Option<&str> {
        self.entity_path.as_deref()
    }
}

impl FromStr for ConnectionString {
    type Err = LmtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectionString::parse(s)
    }
}

// Secrets stay out of debug output.
impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint)
            .field("shared_access_key_name", &self.shared_access_key_name)
            .field("entity_path", &self.entity_path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const VALID: &str = "Endpoint=sb://lmt.servicebus.windows.net/;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=c2VjcmV0";

    #[test]
    fn parses_key_based_string() {
        let cs = ConnectionString::parse(VALID).unwrap();
        assert_eq!(cs.endpoint(), "sb://lmt.servicebus.windows.net/");
        assert_eq!(cs.shared_access_key_name(), Some("RootManageSharedAccessKey"));
        assert_eq!(cs.shared_access_key(), Some("c2VjcmV0"));
        assert!(!format!("{:?}", cs).contains("c2VjcmV0"));
    }

    #[test]
    fn parses_signature_based_string() {
        let cs: ConnectionString = "Endpoint=sb://x/;SharedAccessSignature=SharedAccessSignature sr=x&sig=y"
            .parse()
            .unwrap();
        assert!(cs.shared_access_signature().is_some());
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("SharedAccessKeyName=a;SharedAccessKey=b")]
    #[case("Endpoint=sb://x/")]
    #[case("Endpoint=sb://x/;SharedAccessKeyName=a")]
    #[case("Endpoint=sb://x/;garbage")]
    fn rejects_invalid_strings(#[case] value: &str) {
        assert!(matches!(
            ConnectionString::parse(value),
            Err(LmtError::Configuration(_))
        ));
    }
}
