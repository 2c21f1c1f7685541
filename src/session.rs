use crate::common::Result;

/// Reply side of a transport session. The transport itself lives in the host.
pub trait Session: Send + Sync {
    fn send_response(&self, data: &[u8]) -> Result<()>;
}
