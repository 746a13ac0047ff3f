//! Provider contract and the factory that turns source descriptors into
//! provider configs.

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use conflux_core::{ConfigError, Result};

use crate::cli::CliFlagsProvider;
use crate::file::FileWatcher;
use crate::parser::{parser_for_path, JsonParser, Parser};

/// Called by a watchable provider on every relevant change, or with the
/// error reported by the underlying watcher.
pub type WatchCallback = Arc<dyn Fn(Result<()>) + Send + Sync>;

/// How a provider hands over its data when it does not name a parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// `read` returns an already structured map; no parser is attached.
    Structured,
    /// `read_bytes` returns a document that needs a parser.
    RawBytes,
}

/// A source of configuration data.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Identifier used in logs and error attribution.
    fn name(&self) -> String;

    fn kind(&self) -> ProviderKind;

    /// Structured (flat or nested) key/value data.
    async fn read(&self) -> Result<Map<String, Value>>;

    /// Raw document bytes, for providers that need a parser.
    async fn read_bytes(&self) -> Result<Vec<u8>> {
        Err(ConfigError::unsupported_source(format!(
            "provider '{}' does not support reading raw bytes",
            self.name()
        )))
    }

    /// Parser this provider insists on, overriding kind-based selection.
    fn required_parser(&self) -> Option<Arc<dyn Parser>> {
        None
    }

    /// Change notification capability.
    fn as_watchable(&self) -> Option<&dyn Watchable> {
        None
    }

    /// Release held resources. Called once by `Manager::close`.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A provider that can report changes to its data.
///
/// `watch` while already watching is a no-op; `unwatch` is idempotent and a
/// later `watch` re-arms.
pub trait Watchable: Send + Sync {
    fn watch(&self, callback: WatchCallback) -> Result<()>;

    fn unwatch(&self) -> Result<()>;

    fn is_watching(&self) -> bool;
}

/// A provider paired with the parser (if any) that turns its bytes into a
/// map.
#[derive(Clone)]
pub struct ProviderConfig {
    pub provider: Arc<dyn Provider>,
    pub parser: Option<Arc<dyn Parser>>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider.name())
            .field("parser", &self.parser.as_ref().map(|p| p.name()))
            .finish()
    }
}

impl ProviderConfig {
    /// Read this provider's data as a nested map.
    pub async fn load(&self) -> Result<Map<String, Value>> {
        match &self.parser {
            Some(parser) => {
                let bytes = self.provider.read_bytes().await?;
                parser.parse(&self.provider.name(), &bytes)
            }
            None => self.provider.read().await,
        }
    }

    pub fn watchable(&self) -> Option<&dyn Watchable> {
        self.provider.as_watchable()
    }
}

/// A configuration source descriptor, in precedence order when collected.
pub enum Source {
    /// A config file; format chosen by extension.
    Path(PathBuf),
    Provider(Arc<dyn Provider>),
    Cli(CliFlagsProvider),
    /// Anything else. Resolved by downcasting; unknown types are rejected.
    Raw(Box<dyn Any + Send + Sync>),
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Path(p) => f.debug_tuple("Path").field(p).finish(),
            Source::Provider(p) => f.debug_tuple("Provider").field(&p.name()).finish(),
            Source::Cli(p) => f.debug_tuple("Cli").field(&p.name()).finish(),
            Source::Raw(_) => f.write_str("Raw(..)"),
        }
    }
}

impl From<&str> for Source {
    fn from(path: &str) -> Self {
        Source::Path(PathBuf::from(path))
    }
}

impl From<String> for Source {
    fn from(path: String) -> Self {
        Source::Path(PathBuf::from(path))
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Source::Path(path)
    }
}

impl From<&Path> for Source {
    fn from(path: &Path) -> Self {
        Source::Path(path.to_path_buf())
    }
}

impl From<Arc<dyn Provider>> for Source {
    fn from(provider: Arc<dyn Provider>) -> Self {
        Source::Provider(provider)
    }
}

impl From<CliFlagsProvider> for Source {
    fn from(provider: CliFlagsProvider) -> Self {
        Source::Cli(provider)
    }
}

/// Pick the parser for a provider value: its required parser if it names
/// one, none for structured providers, JSON for raw-bytes providers.
pub fn parser_for_provider(provider: &dyn Provider) -> Option<Arc<dyn Parser>> {
    if let Some(parser) = provider.required_parser() {
        return Some(parser);
    }
    match provider.kind() {
        ProviderKind::Structured => None,
        ProviderKind::RawBytes => Some(Arc::new(JsonParser)),
    }
}

/// Build the provider config for a file path. Files are always backed by a
/// [`FileWatcher`] so they can be watched later.
pub fn file_provider(path: &Path) -> Result<ProviderConfig> {
    let watcher = FileWatcher::new(path)?;
    Ok(ProviderConfig {
        parser: Some(parser_for_path(path)),
        provider: Arc::new(watcher),
    })
}

fn from_provider(provider: Arc<dyn Provider>) -> ProviderConfig {
    ProviderConfig {
        parser: parser_for_provider(provider.as_ref()),
        provider,
    }
}

/// Turn a source descriptor into a provider config.
pub fn provider_config(source: Source) -> Result<ProviderConfig> {
    match source {
        Source::Path(path) => file_provider(&path),
        Source::Provider(provider) => Ok(from_provider(provider)),
        Source::Cli(cli) => Ok(from_provider(Arc::new(cli))),
        Source::Raw(raw) => from_raw(raw),
    }
}

fn from_raw(raw: Box<dyn Any + Send + Sync>) -> Result<ProviderConfig> {
    let raw = match raw.downcast::<String>() {
        Ok(path) => return file_provider(Path::new(path.as_str())),
        Err(raw) => raw,
    };
    let raw = match raw.downcast::<&'static str>() {
        Ok(path) => return file_provider(Path::new(*path)),
        Err(raw) => raw,
    };
    let raw = match raw.downcast::<PathBuf>() {
        Ok(path) => return file_provider(&path),
        Err(raw) => raw,
    };
    let raw = match raw.downcast::<Arc<dyn Provider>>() {
        Ok(provider) => return Ok(from_provider(*provider)),
        Err(raw) => raw,
    };
    let raw = match raw.downcast::<Box<dyn Provider>>() {
        Ok(provider) => return Ok(from_provider(Arc::from(*provider))),
        Err(raw) => raw,
    };
    match raw.downcast::<CliFlagsProvider>() {
        Ok(cli) => Ok(from_provider(Arc::new(*cli))),
        Err(_) => Err(ConfigError::unsupported_source(
            "value is not a path, provider or CLI flags provider",
        )),
    }
}
