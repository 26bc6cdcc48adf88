//! Uniform error taxonomy for the CRB transport and TPM2 command layer (§7).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmError {
    /// A CRB control-area transition (REQ, START, idle) didn't clear within its bounded spin.
    Timeout,
    /// The device returned a non-zero `TPM_RC` response code.
    ResponseCode(u32),
    /// A command or response buffer was too small, or a blob was malformed.
    InvalidFormat,
    InvalidParam,
}
