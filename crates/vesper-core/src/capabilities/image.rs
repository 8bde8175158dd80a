//! PE header walking over images mapped in the inspected space.

use object::pe::{ImageDosHeader, ImageNtHeaders32, ImageNtHeaders64, IMAGE_NT_OPTIONAL_HDR64_MAGIC, IMAGE_NT_SIGNATURE};
use object::read::pe::{ImageNtHeaders, ImageOptionalHeader};

use super::{address_arg, Builtin};
use crate::error::{DebuggerError, Result};
use crate::registry::{Invocation, Output};
use crate::session::Session;
use crate::types::Address;

const DOS_HEADER_LEN: usize = 0x40;
/// Signature, file header and the larger (PE32+) optional header.
const NT_HEADERS_LEN: usize = 0x108;
/// Offset of the optional header from the NT headers.
const OPTIONAL_HEADER_OFFSET: u64 = 0x18;

pub(super) const BUILTINS: &[Builtin] = &[
    Builtin::new("ib2dh", &["dec_op1"], "ib2dh <image-base>", dos_header),
    Builtin::new("ib2nth", &["dec_op1"], "ib2nth <image-base>", nt_headers),
    Builtin::new("ib2oh", &["ib2nth"], "ib2oh <image-base>", optional_header),
    Builtin::new("ib2epo", &["dec_op1", "ib2nth"], "ib2epo <image-base>", entry_point),
];

fn image_base(cx: &mut Invocation<'_>, args: &[String]) -> Result<Address>
{
    address_arg(cx, args, 0)?.ok_or_else(|| DebuggerError::InvalidArgument("missing image base".to_string()))
}

fn not_an_image(base: Address, err: &object::read::Error) -> DebuggerError
{
    DebuggerError::InvalidArgument(format!("no PE image at {base}: {err}"))
}

/// Offset of the NT headers, after checking the `MZ` signature.
fn nt_offset(session: &mut Session, base: Address) -> Result<u32>
{
    let bytes = session.read_memory(base, DOS_HEADER_LEN)?;
    let header = ImageDosHeader::parse(bytes.as_slice()).map_err(|e| not_an_image(base, &e))?;
    Ok(header.nt_headers_offset())
}

fn dos_header(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let base = image_base(cx, args)?;
    nt_offset(cx.session(), base)?;
    Ok(Output::Value(base.value()))
}

fn nt_headers(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let base = image_base(cx, args)?;
    let session = cx.session();
    let nt = base + u64::from(nt_offset(session, base)?);
    let signature = session.with_inspected_space(|space, _| space.read_u32(nt))?;
    if signature != IMAGE_NT_SIGNATURE {
        return Err(DebuggerError::InvalidArgument(format!("bad NT signature 0x{signature:08x} at {nt}")));
    }
    Ok(Output::Value(nt.value()))
}

fn optional_header(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let nt = cx.call_value("ib2nth", args)?;
    Ok(Output::Value(nt + OPTIONAL_HEADER_OFFSET))
}

fn entry_point(cx: &mut Invocation<'_>, args: &[String]) -> Result<Output>
{
    let base = image_base(cx, args)?;
    let nt = Address::new(cx.call_value("ib2nth", args)?);
    let bytes = cx.session().read_memory(nt, NT_HEADERS_LEN)?;
    let rva = entry_point_rva(&bytes).map_err(|e| not_an_image(base, &e))?;
    Ok(Output::Value((base + u64::from(rva)).value()))
}

fn entry_point_rva(nt_headers: &[u8]) -> object::read::Result<u32>
{
    let magic = nt_headers
        .get(OPTIONAL_HEADER_OFFSET as usize..OPTIONAL_HEADER_OFFSET as usize + 2)
        .map_or(0, |m| u16::from_le_bytes([m[0], m[1]]));
    let mut offset = 0;
    if magic == IMAGE_NT_OPTIONAL_HDR64_MAGIC {
        let (headers, _) = ImageNtHeaders64::parse(nt_headers, &mut offset)?;
        Ok(headers.optional_header().address_of_entry_point())
    } else {
        let (headers, _) = ImageNtHeaders32::parse(nt_headers, &mut offset)?;
        Ok(headers.optional_header().address_of_entry_point())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    /// NT headers of a PE32 image with the given entry point.
    fn pe32_headers(entry: u32) -> Vec<u8>
    {
        let mut bytes = vec![0u8; NT_HEADERS_LEN];
        bytes[..4].copy_from_slice(b"PE\0\0");
        // machine i386, size of optional header 0xe0
        bytes[4..6].copy_from_slice(&0x014c_u16.to_le_bytes());
        bytes[0x14..0x16].copy_from_slice(&0xe0_u16.to_le_bytes());
        bytes[0x18..0x1a].copy_from_slice(&0x010b_u16.to_le_bytes());
        bytes[0x28..0x2c].copy_from_slice(&entry.to_le_bytes());
        // number of rva and sizes
        bytes[0x74..0x78].copy_from_slice(&16_u32.to_le_bytes());
        bytes
    }

    #[test]
    fn test_entry_point_rva_pe32()
    {
        assert_eq!(entry_point_rva(&pe32_headers(0x1234)).unwrap(), 0x1234);
    }

    #[test]
    fn test_entry_point_rejects_bad_signature()
    {
        let mut bytes = pe32_headers(0x1234);
        bytes[0] = b'X';
        assert!(entry_point_rva(&bytes).is_err());
    }
}
