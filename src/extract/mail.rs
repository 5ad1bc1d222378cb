//! Mail containers: RFC 5322 messages (`.eml`) and Outlook compound files (`.msg`).
//!
//! Only parts that carry a file name are treated as nested artifacts; bodies
//! without a name are ignored. Forwarded messages (`message/rfc822` parts)
//! are walked for their own attachments.

use std::fs::{self, File};
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use cfb::CompoundFile;
use mail_parser::{Message, MessageParser, MimeHeaders, PartType};
use tracing::{debug, trace};

use super::Unpacked;
use crate::errors::{IoResultExt, Result, SiftError};
use crate::storage::{sanitize_entry_name, write_capped};

/// Storage name prefix of an attachment inside a `.msg` compound file.
const ATTACHMENT_STORAGE_PREFIX: &str = "__attach_version1.0_";

/// Binary payload of an attachment (PR_ATTACH_DATA_BIN).
const ATTACH_DATA_STREAM: &str = "__substg1.0_37010102";

/// File name properties in preference order: long name then short name,
/// each as UTF-16LE (`001F`) or 8-bit (`001E`).
const ATTACH_NAME_STREAMS: [&str; 4] = [
    "__substg1.0_3707001F",
    "__substg1.0_3707001E",
    "__substg1.0_3704001F",
    "__substg1.0_3704001E",
];

/// Write every named attachment of an `.eml` file into `dest`.
pub fn eml_attachments_into(path: &Path, dest: &Path, limit: u64) -> Result<Unpacked> {
    let raw = fs::read(path).with_path(path, "read mail")?;
    let message = MessageParser::default()
        .parse(raw.as_slice())
        .ok_or_else(|| SiftError::malformed_mail(path, "no parsable message structure"))?;

    let mut unpacked = Unpacked::default();
    message_attachments_into(&message, path, dest, limit, &mut unpacked)?;
    Ok(unpacked)
}

fn message_attachments_into(
    message: &Message<'_>,
    path: &Path,
    dest: &Path,
    limit: u64,
    unpacked: &mut Unpacked,
) -> Result<()> {
    for part in &message.parts {
        match &part.body {
            PartType::Multipart(_) => continue,
            PartType::Message(nested) => {
                trace!("Walking forwarded message in {}", path.display());
                message_attachments_into(nested, path, dest, limit, unpacked)?;
            }
            _ => {
                let Some(name) = part.attachment_name().and_then(sanitize_entry_name) else {
                    continue;
                };
                let placed = write_capped(dest, &name, part.contents(), limit, |e| {
                    SiftError::io(path.display().to_string(), "write attachment", e)
                })?;
                unpacked.place(name, placed);
            }
        }
    }
    Ok(())
}

/// Write every attachment of an Outlook `.msg` file into `dest`.
pub fn msg_attachments_into(path: &Path, dest: &Path, limit: u64) -> Result<Unpacked> {
    let file = File::open(path).with_path(path, "open msg")?;
    let mut compound =
        CompoundFile::open(file).map_err(|e| SiftError::malformed_mail(path, e))?;

    let storages: Vec<PathBuf> = compound
        .read_root_storage()
        .filter(|entry| entry.is_storage() && entry.name().starts_with(ATTACHMENT_STORAGE_PREFIX))
        .map(|entry| entry.path().to_path_buf())
        .collect();

    let mut unpacked = Unpacked::default();
    for storage in storages {
        let Some(name) = attachment_name(&mut compound, &storage) else {
            debug!("Attachment {} in {} has no file name", storage.display(), path.display());
            continue;
        };
        // Embedded messages have no data stream; nothing to extract from them.
        let Some(data) = read_stream(&mut compound, &storage.join(ATTACH_DATA_STREAM)) else {
            debug!("Attachment {name} in {} has no binary payload", path.display());
            continue;
        };
        let placed = write_capped(dest, &name, data.as_slice(), limit, |e| {
            SiftError::io(path.display().to_string(), "write attachment", e)
        })?;
        unpacked.place(name, placed);
    }
    Ok(unpacked)
}

fn attachment_name<F: Read + Seek>(compound: &mut CompoundFile<F>, storage: &Path) -> Option<String> {
    ATTACH_NAME_STREAMS.iter().find_map(|stream| {
        let bytes = read_stream(compound, &storage.join(stream))?;
        let decoded = if stream.ends_with("001F") {
            decode_utf16le(&bytes)
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };
        sanitize_entry_name(decoded.trim_end_matches('\0'))
    })
}

fn read_stream<F: Read + Seek>(compound: &mut CompoundFile<F>, path: &Path) -> Option<Vec<u8>> {
    let mut stream = compound.open_stream(path).ok()?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).ok()?;
    Some(buf)
}

fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const NO_CAP: u64 = u64::MAX;

    const MULTIPART: &str = "From: noreply-dmarc-support@google.com\r\n\
To: dmarc@example.com\r\n\
Subject: Report domain: example.com\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain\r\n\
\r\n\
This is an aggregate report.\r\n\
--XYZ\r\n\
Content-Type: text/xml\r\n\
Content-Disposition: attachment; filename=\"report.xml\"\r\n\
\r\n\
<feedback><report_metadata/></feedback>\r\n\
--XYZ--\r\n";

    #[test]
    fn eml_named_parts_only() {
        let dir = tempfile::tempdir().unwrap();
        let eml = dir.path().join("msg.eml");
        fs::write(&eml, MULTIPART).unwrap();
        let out = dir.path().join("out");
        assert_eq!(eml_attachments_into(&eml, &out, NO_CAP).unwrap().written, 1);
        let body = fs::read_to_string(out.join("report.xml")).unwrap();
        assert!(body.starts_with("<feedback>"));
    }

    const FORWARDED: &str = "From: postmaster@example.com\r\n\
To: dmarc@example.com\r\n\
Subject: Fwd: Report domain: example.com\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"OUTER\"\r\n\
\r\n\
--OUTER\r\n\
Content-Type: text/plain\r\n\
\r\n\
Forwarding the report below.\r\n\
--OUTER\r\n\
Content-Type: message/rfc822\r\n\
\r\n\
From: noreply-dmarc-support@google.com\r\n\
Subject: Report domain: example.com\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"INNER\"\r\n\
\r\n\
--INNER\r\n\
Content-Type: text/plain\r\n\
\r\n\
Aggregate report attached.\r\n\
--INNER\r\n\
Content-Type: text/xml\r\n\
Content-Disposition: attachment; filename=\"rua.xml\"\r\n\
\r\n\
<feedback><report_metadata/></feedback>\r\n\
--INNER--\r\n\
\r\n\
--OUTER--\r\n";

    #[test]
    fn eml_forwarded_message_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let eml = dir.path().join("fwd.eml");
        fs::write(&eml, FORWARDED).unwrap();
        let out = dir.path().join("out");
        assert_eq!(eml_attachments_into(&eml, &out, NO_CAP).unwrap().written, 1);
        let body = fs::read_to_string(out.join("rua.xml")).unwrap();
        assert!(body.starts_with("<feedback>"));
    }

    #[test]
    fn eml_attachment_over_cap() {
        let dir = tempfile::tempdir().unwrap();
        let eml = dir.path().join("msg.eml");
        fs::write(&eml, MULTIPART).unwrap();
        let unpacked = eml_attachments_into(&eml, &dir.path().join("out"), 8).unwrap();
        assert_eq!(unpacked.written, 0);
        assert_eq!(unpacked.oversized.len(), 1);
        assert_eq!(unpacked.oversized[0].0, "report.xml");
    }

    #[test]
    fn eml_without_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let eml = dir.path().join("plain.eml");
        fs::write(&eml, "From: a@b.c\r\nSubject: hi\r\n\r\nno attachments here\r\n").unwrap();
        assert_eq!(eml_attachments_into(&eml, &dir.path().join("out"), NO_CAP).unwrap().written, 0);
    }

    #[test]
    fn msg_rejects_non_compound() {
        let dir = tempfile::tempdir().unwrap();
        let msg = dir.path().join("fake.msg");
        fs::write(&msg, b"not an ole file").unwrap();
        let err = msg_attachments_into(&msg, &dir.path().join("out"), NO_CAP).unwrap_err();
        assert!(matches!(err, SiftError::MalformedMail { .. }));
    }

    #[test]
    fn msg_attachment_streams() {
        let dir = tempfile::tempdir().unwrap();
        let msg = dir.path().join("report.msg");
        {
            let mut comp = cfb::create(&msg).unwrap();
            let storage = Path::new("/__attach_version1.0_#00000000");
            comp.create_storage(storage).unwrap();
            let name: Vec<u8> = "rua.xml\0"
                .encode_utf16()
                .flat_map(|u| u.to_le_bytes())
                .collect();
            comp.create_stream(storage.join("__substg1.0_3707001F"))
                .unwrap()
                .write_all(&name)
                .unwrap();
            comp.create_stream(storage.join(ATTACH_DATA_STREAM))
                .unwrap()
                .write_all(b"<feedback/>")
                .unwrap();
            comp.flush().unwrap();
        }
        let out = dir.path().join("out");
        assert_eq!(msg_attachments_into(&msg, &out, NO_CAP).unwrap().written, 1);
        assert_eq!(fs::read(out.join("rua.xml")).unwrap(), b"<feedback/>");
    }

    #[test]
    fn utf16_decoding() {
        let bytes: Vec<u8> = "a.xml".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(decode_utf16le(&bytes), "a.xml");
    }
}
