//! High-level TPM2 commands used by the secure store's TPM mode (§4.14): policy sessions bound
//! to PCR 7, primary/sealed-object creation, load/unseal, and PCR extend.

use alloc::vec::Vec;

use crate::control_area::CrbTransport;
use crate::error::TpmError;
use crate::wire::{Reader, Writer, TPM_ST_NO_SESSIONS, TPM_ST_SESSIONS};

pub const TPM_ALG_SHA256: u16 = 0x000B;
pub const TPM_ALG_NULL: u16 = 0x0010;
pub const TPM_ALG_KEYEDHASH: u16 = 0x0008;
pub const TPM_ALG_RSA: u16 = 0x0001;
pub const TPM_ALG_AES: u16 = 0x0006;
pub const TPM_ALG_CFB: u16 = 0x0043;

pub const TPM_RH_OWNER: u32 = 0x4000_0001;
pub const TPM_RH_NULL: u32 = 0x4000_0007;
pub const TPM_RS_PW: u32 = 0x4000_0009;

pub const TPM_SE_POLICY: u8 = 0x01;
pub const TPM_SE_TRIAL: u8 = 0x03;

const CC_CREATE_PRIMARY: u32 = 0x0000_0131;
const CC_CREATE: u32 = 0x0000_0153;
const CC_LOAD: u32 = 0x0000_0157;
const CC_UNSEAL: u32 = 0x0000_015E;
const CC_FLUSH_CONTEXT: u32 = 0x0000_0165;
const CC_START_AUTH_SESSION: u32 = 0x0000_0176;
const CC_POLICY_PCR: u32 = 0x0000_017F;
const CC_PCR_EXTEND: u32 = 0x0000_0182;
const CC_POLICY_GET_DIGEST: u32 = 0x0000_0189;

/// PCR 7, SHA-256 bank: `sizeofSelect = 3`, bit 7 of the first octet selects PCR 7.
const PCR7_SELECTION: [u8; 3] = [0b1000_0000, 0, 0];

fn sym_def_null(w: &mut Writer) {
    w.u16(TPM_ALG_NULL);
}

/// `TPM2_StartAuthSession`: opens a policy (or, with `trial`, trial-policy) session bound to
/// nothing, over SHA-256. Returns `(session_handle, nonce_tpm)`.
pub fn start_auth_session(
    transport: &mut CrbTransport,
    nonce_caller: &[u8],
    trial: bool,
) -> Result<(u32, Vec<u8>), TpmError> {
    let mut w = Writer::command(TPM_ST_NO_SESSIONS, CC_START_AUTH_SESSION);
    w.u32(TPM_RH_NULL) // tpmKey
        .u32(TPM_RH_NULL) // bind
        .tpm2b(nonce_caller)
        .tpm2b(&[]); // encryptedSalt
    w.u8(if trial { TPM_SE_TRIAL } else { TPM_SE_POLICY });
    sym_def_null(&mut w);
    w.u16(TPM_ALG_SHA256);
    let response = transport.execute(&w.finish())?;

    let mut r = Reader::response(&response)?;
    let session_handle = r.u32()?;
    let nonce_tpm = r.tpm2b()?.to_vec();
    Ok((session_handle, nonce_tpm))
}

/// `TPM2_PolicyPCR` over PCR 7, SHA-256, with an empty expected-digest (match current values).
pub fn policy_pcr(transport: &mut CrbTransport, session_handle: u32) -> Result<(), TpmError> {
    let mut w = Writer::command(TPM_ST_NO_SESSIONS, CC_POLICY_PCR);
    w.u32(session_handle).tpm2b(&[]);
    w.u32(1); // pcrSelection count
    w.u16(TPM_ALG_SHA256).u8(3).raw(&PCR7_SELECTION);
    let response = transport.execute(&w.finish())?;
    Reader::response(&response)?;
    Ok(())
}

/// `TPM2_PolicyGetDigest`: the policy digest bound to the session's accumulated assertions.
pub fn policy_get_digest(transport: &mut CrbTransport, session_handle: u32) -> Result<Vec<u8>, TpmError> {
    let mut w = Writer::command(TPM_ST_NO_SESSIONS, CC_POLICY_GET_DIGEST);
    w.u32(session_handle);
    let response = transport.execute(&w.finish())?;
    let mut r = Reader::response(&response)?;
    Ok(r.tpm2b()?.to_vec())
}

/// `TPM2_CreatePrimary` under the owner hierarchy: an RSA-2048 storage key with an AES-128-CFB
/// symmetric scheme. Returns `(object_handle, out_public)`.
pub fn create_primary_storage_key(transport: &mut CrbTransport) -> Result<(u32, Vec<u8>), TpmError> {
    let mut w = Writer::command(TPM_ST_SESSIONS, CC_CREATE_PRIMARY);
    w.u32(TPM_RH_OWNER);
    w.password_session();

    // inSensitive: TPM2B_SENSITIVE_CREATE { userAuth: empty, data: empty }
    let mut sensitive = Vec::new();
    sensitive.extend_from_slice(&0u16.to_be_bytes()); // userAuth
    sensitive.extend_from_slice(&0u16.to_be_bytes()); // data
    w.tpm2b(&sensitive);

    // inPublic: RSA storage-key template.
    let mut public = Vec::new();
    public.extend_from_slice(&TPM_ALG_RSA.to_be_bytes());
    public.extend_from_slice(&TPM_ALG_SHA256.to_be_bytes());
    const FIXED_TPM: u32 = 1 << 1;
    const FIXED_PARENT: u32 = 1 << 4;
    const SENSITIVE_DATA_ORIGIN: u32 = 1 << 5;
    const USER_WITH_AUTH: u32 = 1 << 6;
    const RESTRICTED: u32 = 1 << 16;
    const DECRYPT: u32 = 1 << 17;
    let attrs = FIXED_TPM | FIXED_PARENT | SENSITIVE_DATA_ORIGIN | USER_WITH_AUTH | RESTRICTED | DECRYPT;
    public.extend_from_slice(&attrs.to_be_bytes());
    public.extend_from_slice(&0u16.to_be_bytes()); // authPolicy, empty
    public.extend_from_slice(&TPM_ALG_AES.to_be_bytes());
    public.extend_from_slice(&128u16.to_be_bytes());
    public.extend_from_slice(&TPM_ALG_CFB.to_be_bytes());
    public.extend_from_slice(&TPM_ALG_NULL.to_be_bytes()); // scheme: NULL
    public.extend_from_slice(&2048u16.to_be_bytes()); // keyBits
    public.extend_from_slice(&0u32.to_be_bytes()); // exponent, 0 = default 65537
    public.extend_from_slice(&0u16.to_be_bytes()); // unique, empty
    w.tpm2b(&public);

    w.tpm2b(&[]); // outsideInfo
    w.u32(0); // creationPCR count

    let response = transport.execute(&w.finish())?;
    let mut r = Reader::response(&response)?;
    let object_handle = r.u32()?;
    let _parameter_size = r.parameter_size()?;
    let out_public = r.tpm2b()?.to_vec();
    Ok((object_handle, out_public))
}

/// `TPM2_Create`: a keyed-hash sealed object under `parent_handle` with `admin_with_policy`
/// bound to `auth_policy`, sealing `data`. Returns `(out_private, out_public)`.
pub fn create_sealed_object(
    transport: &mut CrbTransport,
    parent_handle: u32,
    data: &[u8],
    auth_policy: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), TpmError> {
    let mut w = Writer::command(TPM_ST_SESSIONS, CC_CREATE);
    w.u32(parent_handle);
    w.password_session();

    let mut sensitive = Vec::new();
    sensitive.extend_from_slice(&0u16.to_be_bytes()); // userAuth, empty
    sensitive.extend_from_slice(&(data.len() as u16).to_be_bytes());
    sensitive.extend_from_slice(data);
    w.tpm2b(&sensitive);

    let mut public = Vec::new();
    public.extend_from_slice(&TPM_ALG_KEYEDHASH.to_be_bytes());
    public.extend_from_slice(&TPM_ALG_SHA256.to_be_bytes());
    const ADMIN_WITH_POLICY: u32 = 1 << 6;
    public.extend_from_slice(&ADMIN_WITH_POLICY.to_be_bytes());
    public.extend_from_slice(&(auth_policy.len() as u16).to_be_bytes());
    public.extend_from_slice(auth_policy);
    public.extend_from_slice(&TPM_ALG_NULL.to_be_bytes()); // keyedHash scheme: NULL (sealed data blob)
    public.extend_from_slice(&0u16.to_be_bytes()); // unique, empty
    w.tpm2b(&public);

    w.tpm2b(&[]); // outsideInfo
    w.u32(0); // creationPCR count

    let response = transport.execute(&w.finish())?;
    let mut r = Reader::response(&response)?;
    let _parameter_size = r.parameter_size()?;
    let out_private = r.tpm2b()?.to_vec();
    let out_public = r.tpm2b()?.to_vec();
    Ok((out_private, out_public))
}

/// `TPM2_Load`: loads a previously created private/public blob pair under `parent_handle`.
pub fn load(
    transport: &mut CrbTransport,
    parent_handle: u32,
    private: &[u8],
    public: &[u8],
) -> Result<u32, TpmError> {
    let mut w = Writer::command(TPM_ST_SESSIONS, CC_LOAD);
    w.u32(parent_handle);
    w.password_session();
    w.tpm2b(private);
    w.tpm2b(public);
    let response = transport.execute(&w.finish())?;
    let mut r = Reader::response(&response)?;
    let handle = r.u32()?;
    Ok(handle)
}

/// `TPM2_Unseal`, authorized by `policy_session` (must have satisfied `PolicyPCR` for PCR 7).
pub fn unseal(transport: &mut CrbTransport, item_handle: u32, policy_session: u32) -> Result<Vec<u8>, TpmError> {
    let mut w = Writer::command(TPM_ST_SESSIONS, CC_UNSEAL);
    w.u32(item_handle);
    let mut session = Vec::new();
    session.extend_from_slice(&policy_session.to_be_bytes());
    session.extend_from_slice(&0u16.to_be_bytes()); // nonceCaller
    session.push(0); // sessionAttributes
    session.extend_from_slice(&0u16.to_be_bytes()); // hmac
    w.u32(session.len() as u32).raw(&session);

    let response = transport.execute(&w.finish())?;
    let mut r = Reader::response(&response)?;
    let _parameter_size = r.parameter_size()?;
    Ok(r.tpm2b()?.to_vec())
}

/// `TPM2_PCR_Extend` on PCR 7 with a SHA-256 digest.
pub fn pcr_extend(transport: &mut CrbTransport, digest: &[u8; 32]) -> Result<(), TpmError> {
    let mut w = Writer::command(TPM_ST_SESSIONS, CC_PCR_EXTEND);
    w.u32(7); // pcrHandle
    w.password_session();
    w.u32(1); // digest count
    w.u16(TPM_ALG_SHA256).raw(digest);
    let response = transport.execute(&w.finish())?;
    Reader::response(&response)?;
    Ok(())
}

/// `TPM2_FlushContext`: releases a transient (session or object) handle.
pub fn flush_context(transport: &mut CrbTransport, handle: u32) -> Result<(), TpmError> {
    let mut w = Writer::command(TPM_ST_NO_SESSIONS, CC_FLUSH_CONTEXT);
    w.u32(handle);
    let response = transport.execute(&w.finish())?;
    Reader::response(&response)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcr7_selection_sets_only_bit_seven_of_the_first_octet() {
        assert_eq!(PCR7_SELECTION, [0x80, 0x00, 0x00]);
    }
}
