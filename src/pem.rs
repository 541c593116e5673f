//! PEM armour: `-----BEGIN <LABEL>-----` / `-----END <LABEL>-----` framed
//! base64 DER, read one line at a time so that large CA bundles can be
//! searched without holding every object in memory.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::Error;

const BEGIN: &[u8] = b"-----BEGIN ";
const END: &[u8] = b"-----END ";
const TRAILER: &[u8] = b"-----";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PemKind {
    Certificate,
    /// PKCS#8 `PrivateKeyInfo`.
    PrivateKey,
    /// PKCS#1 `RSAPrivateKey`.
    RsaPrivateKey,
}

impl PemKind {
    fn from_label(label: &[u8]) -> Option<Self> {
        match label {
            b"CERTIFICATE" | b"X509 CERTIFICATE" | b"TRUSTED CERTIFICATE" => {
                Some(Self::Certificate)
            }
            b"PRIVATE KEY" => Some(Self::PrivateKey),
            b"RSA PRIVATE KEY" => Some(Self::RsaPrivateKey),
            _ => None,
        }
    }

    pub fn is_private_key(&self) -> bool {
        matches!(self, Self::PrivateKey | Self::RsaPrivateKey)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PemObject {
    pub kind: PemKind,
    pub der: Vec<u8>,
}

/// Iterator over the PEM objects in a stream. Objects with labels other
/// than those in [`PemKind`] are skipped.
pub struct PemReader<R> {
    reader: R,
    line: Vec<u8>,
    line_no: usize,
}

impl<R: BufRead> PemReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            line_no: 0,
        }
    }

    /// Next line with surrounding whitespace removed; `None` at EOF.
    fn next_line(&mut self) -> Result<Option<&[u8]>, Error> {
        self.line.clear();
        let n = self
            .reader
            .read_until(b'\n', &mut self.line)
            .map_err(Error::from_io)?;
        if n == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        Ok(Some(self.line.trim_ascii()))
    }

    fn read_object(&mut self) -> Result<Option<PemObject>, Error> {
        // find a BEGIN marker we understand
        let (kind, label) = loop {
            let Some(line) = self.next_line()? else {
                return Ok(None);
            };
            let Some(label) = marker(line, BEGIN) else {
                continue;
            };
            match PemKind::from_label(label) {
                Some(kind) => break (kind, Some(label.to_vec())),
                None => {
                    log::trace!("skipping PEM object {:?}", String::from_utf8_lossy(label));
                    break (PemKind::Certificate, None);
                }
            }
        };

        let mut der = Vec::new();
        loop {
            let line_no = self.line_no + 1;
            let Some(line) = self.next_line()? else {
                return Err(Error::bad_data("PEM object without END marker"));
            };
            if let Some(end_label) = marker(line, END) {
                if label.as_deref().is_some_and(|l| l != end_label) {
                    return Err(Error::bad_data("mismatched PEM END marker"));
                }
                break;
            }
            if label.is_none() || line.is_empty() {
                continue;
            }
            STANDARD.decode_vec(line, &mut der).map_err(|e| {
                log::warn!("bad base64 on PEM line {line_no}: {e}");
                Error::bad_data("invalid base64 in PEM object")
            })?;
        }

        match label {
            Some(_) => Ok(Some(PemObject { kind, der })),
            // an object we do not understand: move on to the next one
            None => self.read_object(),
        }
    }
}

impl<R: BufRead> Iterator for PemReader<R> {
    type Item = Result<PemObject, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_object().transpose()
    }
}

fn marker<'a>(line: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    line.strip_prefix(prefix)?.strip_suffix(TRAILER)
}

pub fn open(path: &Path) -> Result<PemReader<BufReader<File>>, Error> {
    let file = File::open(path).map_err(|e| {
        log::warn!("cannot open {}: {e}", path.display());
        Error::from_io(e)
    })?;
    Ok(PemReader::new(BufReader::new(file)))
}

/// All PEM objects in `data`.
pub fn parse(data: &[u8]) -> Result<Vec<PemObject>, Error> {
    PemReader::new(data).collect()
}

/// Loads the objects of a PEM file for which `filter` returns true.
pub fn load_file(
    path: &Path,
    mut filter: impl FnMut(&PemObject) -> bool,
) -> Result<Vec<PemObject>, Error> {
    let mut kept = Vec::new();
    for object in open(path)? {
        let object = object?;
        if filter(&object) {
            kept.push(object);
        }
    }
    Ok(kept)
}
