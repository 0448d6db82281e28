//! Solve request construction
//!
//! Translates [`BuildOptions`] into the structured request sent to the build engine.

use crate::config::{validate_build_arg_key, BuildOptions};
use crate::error::{Error, Result};
use crate::reference;
use serde::Serialize;
use std::collections::BTreeMap;

pub const DOCKERFILE_FRONTEND: &str = "dockerfile.v0";
pub const IMAGE_EXPORTER: &str = "image";
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

const ATTR_FILENAME: &str = "filename";
const ATTR_NO_CACHE: &str = "no-cache";
const ATTR_EXPORT_NAME: &str = "name";
const BUILD_ARG_PREFIX: &str = "build-arg:";
const LABEL_PREFIX: &str = "label:";

/// A single-use build request. Each one carries a fresh `ref_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolveRequest {
    pub ref_id: String,
    pub session_id: String,
    pub frontend: String,
    pub frontend_attrs: BTreeMap<String, String>,
    pub exporter: String,
    pub exporter_attrs: BTreeMap<String, String>,
}

impl SolveRequest {
    /// Fully qualified, tagged name the exporter will write
    pub fn image_name(&self) -> &str {
        self.exporter_attrs
            .get(ATTR_EXPORT_NAME)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// Compose `registry/name[:tag]` and normalize it to a tagged reference
pub fn image_reference(opts: &BuildOptions) -> Result<String> {
    let registry = strip_scheme(&opts.registry_url).trim_end_matches('/');
    let mut image = if registry.is_empty() {
        opts.image_name.clone()
    } else {
        format!("{}/{}", registry, opts.image_name)
    };
    if let Some(tag) = opts.tag.as_deref().filter(|t| !t.is_empty()) {
        image = format!("{}:{}", image, tag);
    }

    reference::normalize(&image)
}

fn strip_scheme(url: &str) -> &str {
    match url.find("://") {
        Some(pos) => &url[pos + 3..],
        None => url,
    }
}

/// Build a solve request bound to `session_id`. `opts` is only read.
pub fn build_solve_request(session_id: &str, opts: &BuildOptions) -> Result<SolveRequest> {
    let image = image_reference(opts)?;

    let mut frontend_attrs = BTreeMap::new();
    frontend_attrs.insert(ATTR_FILENAME.to_string(), DEFAULT_DOCKERFILE.to_string());

    if opts.no_cache {
        frontend_attrs.insert(ATTR_NO_CACHE.to_string(), String::new());
    }

    for (key, value) in &opts.build_args {
        validate_build_arg_key(&format!("{}={}", key, value), key)?;
        let (attr, value) = parse_frontend_opt(&format!("{}{}={}", BUILD_ARG_PREFIX, key, value))?;
        frontend_attrs.insert(attr, value);
    }

    for (key, value) in &opts.labels {
        frontend_attrs.insert(format!("{}{}", LABEL_PREFIX, key), value.clone());
    }

    let mut exporter_attrs = BTreeMap::new();
    exporter_attrs.insert(ATTR_EXPORT_NAME.to_string(), image);

    Ok(SolveRequest {
        ref_id: uuid::Uuid::new_v4().simple().to_string(),
        session_id: session_id.to_string(),
        frontend: DOCKERFILE_FRONTEND.to_string(),
        frontend_attrs,
        exporter: IMAGE_EXPORTER.to_string(),
        exporter_attrs,
    })
}

/// Read a frontend option the way the engine's option parser does: one CSV record
/// whose fields are each `KEY=VALUE`. The option must set exactly one attribute.
fn parse_frontend_opt(opt: &str) -> Result<(String, String)> {
    let malformed = |reason: String| Error::MalformedBuildArg {
        arg: opt.to_string(),
        reason,
    };

    let fields = split_csv_record(opt).map_err(|reason| malformed(reason.to_string()))?;
    let mut pairs = Vec::with_capacity(fields.len());
    for field in &fields {
        let (attr, value) = field
            .split_once('=')
            .ok_or_else(|| malformed(format!("invalid value {}", field)))?;
        pairs.push((attr.to_string(), value.to_string()));
    }

    match pairs.pop() {
        Some(pair) if pairs.is_empty() => Ok(pair),
        _ => Err(malformed("value sets more than one attribute".to_string())),
    }
}

/// Split one CSV record into fields. Quoted fields may contain commas and `""` escapes;
/// a quote inside an unquoted field is an error.
fn split_csv_record(record: &str) -> std::result::Result<Vec<String>, &'static str> {
    let mut fields = Vec::new();
    let mut chars = record.chars().peekable();

    loop {
        let mut field = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        field.push('"');
                    }
                    Some('"') => break,
                    Some(c) => field.push(c),
                    None => return Err("unterminated quoted field"),
                }
            }
            fields.push(field);
            match chars.next() {
                None => return Ok(fields),
                Some(',') => {}
                Some(_) => return Err("extraneous character after closing quote"),
            }
        } else {
            loop {
                match chars.next() {
                    Some('"') => return Err("bare quote in unquoted field"),
                    Some(',') => break,
                    Some(c) => field.push(c),
                    None => {
                        fields.push(field);
                        return Ok(fields);
                    }
                }
            }
            fields.push(field);
        }
    }
}
