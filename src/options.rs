use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::request::CreateRequest;
use crate::uid::Uid;
use crate::{DataStoreError, File, Result};

/// Pluggable upload id generator. Receives the creation request so ids can be
/// derived from its content.
pub type NamingFunction = Arc<dyn Fn(&CreateRequest) -> String + Send + Sync>;

pub const DEFAULT_ID_RETRY_BUDGET: u32 = 5;

/// Configuration shared by every store backend.
#[derive(Clone)]
pub struct StoreOptions {
    path: String,
    naming_function: NamingFunction,
    extensions: Option<Vec<String>>,
    id_retry_budget: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOptions {
    path: Option<String>,
    naming_function: Option<Value>,
    extensions: Option<Value>,
    id_retry_budget: Option<u32>,
}

fn builtin_naming_function(name: &str) -> Option<NamingFunction> {
    match name {
        "uid" => Some(Arc::new(|_: &CreateRequest| Uid::rand()) as NamingFunction),
        "uuid" => Some(Arc::new(|_: &CreateRequest| Uuid::new_v4().to_string()) as NamingFunction),
        _ => None,
    }
}

fn extensions_from_value(value: &Value) -> Result<Vec<String>> {
    let not_an_array = || DataStoreError::invalid("extensions must be an array");

    value
        .as_array()
        .ok_or_else(not_an_array)?
        .iter()
        .map(|item| item.as_str().map(String::from).ok_or_else(not_an_array))
        .collect()
}

impl StoreOptions {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if path.trim().is_empty() {
            return Err(DataStoreError::invalid("Store must have a path"));
        }

        Ok(Self {
            path,
            naming_function: Arc::new(|_: &CreateRequest| Uid::rand()),
            extensions: None,
            id_retry_budget: DEFAULT_ID_RETRY_BUDGET,
        })
    }

    /// Loads options from a JSON document shaped like
    /// `{ "path": "/files", "namingFunction": "uid", "extensions": ["creation"] }`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let raw: RawOptions = serde_json::from_value(value.clone())
            .map_err(|e| DataStoreError::invalid(format!("invalid store options: {}", e)))?;

        let mut options = Self::new(raw.path.unwrap_or_default())?;

        if let Some(naming) = raw.naming_function.filter(|v| !v.is_null()) {
            let name = naming
                .as_str()
                .ok_or_else(|| DataStoreError::invalid("namingFunction must be a function"))?;
            options.naming_function = builtin_naming_function(name).ok_or_else(|| {
                DataStoreError::invalid(format!("unknown namingFunction `{}`", name))
            })?;
        }

        if let Some(extensions) = raw.extensions.filter(|v| !v.is_null()) {
            options.extensions = Some(extensions_from_value(&extensions)?);
        }

        if let Some(budget) = raw.id_retry_budget {
            options = options.with_id_retry_budget(budget)?;
        }

        Ok(options)
    }

    pub fn with_naming_function<F>(mut self, naming_function: F) -> Self
    where
        F: Fn(&CreateRequest) -> String + Send + Sync + 'static,
    {
        self.naming_function = Arc::new(naming_function);
        self
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_extensions(extensions);
        self
    }

    pub fn with_id_retry_budget(mut self, budget: u32) -> Result<Self> {
        if budget == 0 {
            return Err(DataStoreError::invalid("idRetryBudget must be at least 1"));
        }
        self.id_retry_budget = budget;
        Ok(self)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resource reference for an upload, e.g. `/files/<id>`.
    pub fn location(&self, file_id: &str) -> String {
        format!("{}/{}", self.path.trim_end_matches('/'), file_id)
    }

    pub fn generate_file_name(&self, request: &CreateRequest) -> String {
        (self.naming_function)(request)
    }

    /// Advertised extensions, `None` until configured.
    pub fn extensions(&self) -> Option<&[String]> {
        self.extensions.as_deref()
    }

    pub fn set_extensions<I, S>(&mut self, extensions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = Some(extensions.into_iter().map(Into::into).collect());
    }

    /// Sets extensions from an untyped value; anything but an array of strings is rejected.
    pub fn set_extensions_value(&mut self, value: &Value) -> Result<()> {
        self.extensions = Some(extensions_from_value(value)?);
        Ok(())
    }

    /// Value for a `Tus-Extension` header.
    pub fn extensions_header(&self) -> Option<String> {
        self.extensions.as_ref().map(|extensions| extensions.join(","))
    }

    pub fn id_retry_budget(&self) -> u32 {
        self.id_retry_budget
    }

    /// Generates an id, builds the [`File`] and hands it to `try_reserve`
    /// until the backend accepts one or the retry budget runs out.
    ///
    /// `try_reserve` must atomically claim the id and resolve to `None` if it
    /// was already taken. Validation errors from [`File::new`] are returned as is.
    pub async fn reserve_file<F, Fut>(&self, request: &CreateRequest, try_reserve: F) -> Result<File>
    where
        F: Fn(File) -> Fut,
        Fut: Future<Output = Result<Option<File>>>,
    {
        for attempt in 1..=self.id_retry_budget {
            let file = File::new(
                self.generate_file_name(request),
                request.upload_length,
                request.upload_defer_length,
                request.upload_metadata.clone(),
            )?;
            let file_id = file.id().to_string();

            match try_reserve(file).await? {
                Some(file) => return Ok(file),
                None => {
                    tracing::warn!(file_id = %file_id, attempt, "Upload id already in use");
                }
            }
        }

        Err(DataStoreError::ResourceExhausted {
            attempts: self.id_retry_budget,
        })
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("path", &self.path)
            .field("extensions", &self.extensions)
            .field("id_retry_budget", &self.id_retry_budget)
            .finish_non_exhaustive()
    }
}
