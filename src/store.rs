//! Trusted CA certificates.
//!
//! Certificates are either parsed up front into an in-memory chain, or
//! (with the `lazy-ca-store` feature, and always for the system default
//! locations) remembered as file names and searched when a chain is
//! verified. Both are consulted through [`CaStore::find_issuer`].

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::pem::{self, PemKind};
use crate::x509::X509;

#[derive(Clone, Debug, Default)]
pub struct CaStore {
    chain: Option<Box<X509>>,
    lazy_files: Vec<PathBuf>,
}

impl CaStore {
    /// Adds one trusted certificate. Any chain hanging off `cert` is dropped.
    pub fn add(&mut self, mut cert: X509) {
        cert.next = self.chain.take();
        self.chain = Some(Box::new(cert));
    }

    /// Loads a PEM file the way the store is configured to.
    pub fn load_file(&mut self, path: &Path) -> Result<(), Error> {
        if cfg!(feature = "lazy-ca-store") {
            self.add_lazy_file(path)
        } else {
            self.add_pem_file(path).map(|_| ())
        }
    }

    /// Loads every file in `dir`; unreadable files are skipped.
    pub fn load_dir(&mut self, dir: &Path) -> Result<(), Error> {
        let entries = fs::read_dir(dir).map_err(Error::from_io)?;
        for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
            if !path.is_file() {
                continue;
            }
            if let Err(e) = self.load_file(&path) {
                log::debug!("skipping {}: {e}", path.display());
            }
        }
        Ok(())
    }

    /// Parses all certificates in a PEM file into the store.
    pub fn add_pem_file(&mut self, path: &Path) -> Result<usize, Error> {
        let objects = pem::load_file(path, |obj| obj.kind == PemKind::Certificate)?;
        let mut added = 0;
        for obj in objects {
            match X509::new(&obj.der) {
                Ok(cert) => {
                    self.add(cert);
                    added += 1;
                }
                Err(e) => log::warn!("ignoring unparsable CA in {}: {e}", path.display()),
            }
        }
        if added == 0 {
            return Err(Error::bad_data("no usable certificates in CA file"));
        }
        log::debug!("loaded {added} CA certificates from {}", path.display());
        Ok(added)
    }

    /// Remembers a PEM file to be searched at verification time.
    pub fn add_lazy_file(&mut self, path: &Path) -> Result<(), Error> {
        fs::metadata(path).map_err(Error::from_io)?;
        self.lazy_files.push(path.to_path_buf());
        Ok(())
    }

    /// Remembers the platform's default CA file and directory, as found by
    /// `openssl-probe`.
    pub fn add_default_paths(&mut self) -> Result<(), Error> {
        let probe = openssl_probe::probe();
        if let Some(file) = &probe.cert_file {
            self.add_lazy_file(file)?;
        }
        if let Some(dir) = &probe.cert_dir {
            let entries = fs::read_dir(dir).map_err(Error::from_io)?;
            self.lazy_files.extend(
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_file()),
            );
        }
        if probe.cert_file.is_none() && probe.cert_dir.is_none() {
            log::warn!("no default CA locations found");
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_none() && self.lazy_files.is_empty()
    }

    /// Finds a trusted certificate whose subject is exactly `issuer`.
    pub fn find_issuer(&self, issuer: &[u8]) -> Result<Option<Cow<'_, X509>>, Error> {
        if let Some(found) = self
            .chain
            .as_deref()
            .and_then(|head| head.iter().find(|ca| ca.subject() == issuer))
        {
            return Ok(Some(Cow::Borrowed(found)));
        }

        for path in &self.lazy_files {
            let reader = match pem::open(path) {
                Ok(reader) => reader,
                Err(e) => {
                    log::debug!("skipping {}: {e}", path.display());
                    continue;
                }
            };
            for obj in reader {
                let obj = match obj {
                    Ok(obj) => obj,
                    Err(e) => {
                        log::debug!("stopped reading {}: {e}", path.display());
                        break;
                    }
                };
                if obj.kind != PemKind::Certificate {
                    continue;
                }
                // a cheap prefilter before full parsing: the name must appear verbatim
                if !contains(&obj.der, issuer) {
                    continue;
                }
                match X509::new(&obj.der) {
                    Ok(cert) if cert.subject() == issuer => return Ok(Some(Cow::Owned(cert))),
                    Ok(_) => {}
                    Err(e) => log::trace!("unparsable CA in {}: {e}", path.display()),
                }
            }
        }

        Ok(None)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}
