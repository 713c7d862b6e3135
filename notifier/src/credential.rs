//! Discovery of the Syncthing REST endpoint and API key.
//!
//! Syncthing stores its GUI/REST settings in `config.xml`:
//!
//! ```xml
//! <configuration version="37">
//!     <gui enabled="true" tls="false">
//!         <address>127.0.0.1:8384</address>
//!         <apikey>abc123</apikey>
//!     </gui>
//! </configuration>
//! ```
//!
//! The credential is resolved once at startup. Any failure here is fatal:
//! without an endpoint and key the monitor cannot do anything useful.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;
use zeroize::Zeroizing;

/// Syncthing's configuration file name.
pub const CONFIG_FILE: &str = "config.xml";

/// Errors that can occur while resolving the credential.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// No config file found at any candidate location.
    #[error("Syncthing config not found (looked in: {})", format_paths(.0))]
    NotFound(Vec<PathBuf>),

    /// The config file exists but could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not well-formed XML.
    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    /// A required element is missing or empty.
    #[error("missing <{0}> in Syncthing config")]
    MissingElement(&'static str),

    /// The GUI listens on a transport the monitor cannot reach.
    #[error("unsupported GUI address: {0}")]
    UnsupportedAddress(String),
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Base URL and API key for the daemon's REST API.
#[derive(Clone)]
pub struct Credential {
    base_url: String,
    api_key: Zeroizing<String>,
}

impl Credential {
    /// Creates a credential, trimming any trailing slash from `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: Zeroizing::new(api_key.into()),
        }
    }

    /// REST base URL, e.g. `http://127.0.0.1:8384`.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// API key sent in the `X-API-Key` header.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// API key with everything but the last four characters masked.
    #[must_use]
    pub fn redacted_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        let visible: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        format!("***{visible}")
    }

    /// Reads the credential from a Syncthing `config.xml`.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError` if the file cannot be read or parsed, or
    /// lacks a usable GUI address or API key.
    pub fn from_config_file(path: &Path) -> Result<Self, CredentialError> {
        let xml = fs::read_to_string(path).map_err(|source| CredentialError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        parse_config_xml(&xml).map_err(|e| match e {
            CredentialError::Parse { message, .. } => CredentialError::Parse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Reads the credential from the first existing candidate path.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::NotFound` if none of the candidates exist,
    /// or the error from [`Credential::from_config_file`].
    pub fn discover(candidates: &[PathBuf]) -> Result<Self, CredentialError> {
        let path = candidates
            .iter()
            .find(|p| p.is_file())
            .ok_or_else(|| CredentialError::NotFound(candidates.to_vec()))?;
        Self::from_config_file(path)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("base_url", &self.base_url)
            .field("api_key", &self.redacted_key())
            .finish()
    }
}

/// Platform locations where Syncthing keeps `config.xml`, most likely first.
#[must_use]
pub fn default_config_paths() -> Vec<PathBuf> {
    let Some(base_dirs) = BaseDirs::new() else {
        return Vec::new();
    };
    let home = base_dirs.home_dir();

    let mut paths = Vec::new();
    if cfg!(target_os = "macos") {
        paths.push(home.join("Library/Application Support/Syncthing"));
    } else if cfg!(windows) {
        paths.push(base_dirs.data_local_dir().join("Syncthing"));
    } else {
        // Syncthing 1.27+ uses the XDG state dir; older releases use the
        // config dir.
        let state_dir = base_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| home.join(".local/state"));
        paths.push(state_dir.join("syncthing"));
        paths.push(base_dirs.config_dir().join("syncthing"));
    }

    paths.into_iter().map(|dir| dir.join(CONFIG_FILE)).collect()
}

/// Extracts the GUI address and API key from `config.xml` contents.
///
/// # Errors
///
/// Returns `CredentialError::Parse` for malformed XML (with an empty path)
/// and `CredentialError::MissingElement` if `<gui>`, `<address>` or
/// `<apikey>` is absent.
pub fn parse_config_xml(xml: &str) -> Result<Credential, CredentialError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut depth = 0usize;
    let mut gui_depth: Option<usize> = None;
    let mut tls = false;
    let mut current: Option<&'static str> = None;
    let mut address: Option<String> = None;
    let mut api_key: Option<String> = None;

    loop {
        let event = reader.read_event().map_err(|e| CredentialError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })?;

        match event {
            Event::Start(ref e) => {
                depth += 1;
                let name = e.local_name();
                match (gui_depth, name.as_ref()) {
                    // Only the top-level <gui>, not e.g. a device's settings.
                    (None, b"gui") if depth == 2 => {
                        gui_depth = Some(depth);
                        tls = attribute_is_true(e, b"tls");
                    }
                    (Some(g), b"address") if depth == g + 1 => current = Some("address"),
                    (Some(g), b"apikey") if depth == g + 1 => current = Some("apikey"),
                    _ => current = None,
                }
            }
            Event::Empty(ref e) => {
                if gui_depth.is_none() && depth == 1 && e.local_name().as_ref() == b"gui" {
                    return Err(CredentialError::MissingElement("address"));
                }
            }
            Event::Text(ref e) => {
                if let Some(field) = current {
                    let text = e
                        .unescape()
                        .map_err(|err| CredentialError::Parse {
                            path: PathBuf::new(),
                            message: err.to_string(),
                        })?
                        .trim()
                        .to_string();
                    match field {
                        "address" => address = Some(text),
                        _ => api_key = Some(text),
                    }
                }
            }
            Event::End(_) => {
                if gui_depth == Some(depth) {
                    break;
                }
                current = None;
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if gui_depth.is_none() {
        return Err(CredentialError::MissingElement("gui"));
    }

    let address = address
        .filter(|a| !a.is_empty())
        .ok_or(CredentialError::MissingElement("address"))?;
    let api_key = api_key
        .filter(|k| !k.is_empty())
        .ok_or(CredentialError::MissingElement("apikey"))?;

    Ok(Credential::new(gui_base_url(&address, tls)?, api_key))
}

fn attribute_is_true(element: &BytesStart<'_>, key: &[u8]) -> bool {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key)
        .is_some_and(|attr| attr.value.as_ref().eq_ignore_ascii_case(b"true"))
}

/// Turns a GUI listen address into a URL the monitor can connect to.
fn gui_base_url(address: &str, tls: bool) -> Result<String, CredentialError> {
    if address.starts_with('/') || address.starts_with("unix://") {
        return Err(CredentialError::UnsupportedAddress(address.to_string()));
    }

    let with_scheme = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else if tls {
        format!("https://{address}")
    } else {
        format!("http://{address}")
    };

    // A wildcard listen address is not a connectable destination.
    Ok(with_scheme
        .replacen("://0.0.0.0", "://127.0.0.1", 1)
        .replacen("://[::]", "://[::1]", 1))
}
