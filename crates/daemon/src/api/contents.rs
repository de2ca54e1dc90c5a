// `/api/notebooks` handlers.
//
// Routing works on the raw request path: the remainder after the API base is
// percent-decoded one segment at a time, so escaped `/` inside a name never
// splits it. A path whose last segment carries a document extension is a
// document; `<document>/checkpoints[/<id>]` addresses its checkpoints.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use nbstore_common::path::{normalize_segment, url_escape, url_path_join, VirtualPath};
use nbstore_common::types::{CheckpointModel, DocumentModel, SaveRequest};
use serde::Deserialize;

use super::error::{ApiError, ErrorCode};
use super::API_BASE;
use crate::store::ContentsStore;

const CHECKPOINTS_SEGMENT: &str = "checkpoints";

type ApiResult = Result<Response, ApiError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    Directory(VirtualPath),
    Document { dir: VirtualPath, name: String },
    Checkpoints { dir: VirtualPath, name: String },
    Checkpoint { dir: VirtualPath, name: String, id: String },
}

impl Target {
    pub(crate) fn parse(uri: &Uri, store: &ContentsStore) -> Result<Self, ApiError> {
        let rest = uri.path().strip_prefix(API_BASE).unwrap_or_default();
        let path = VirtualPath::from_url(rest)?;
        let segments = path.segments();
        let is_document = |name: &String| store.config().is_document_name(name);
        let dir_of = |len: usize| VirtualPath::from_segments(&segments[..len]);

        let target = match segments {
            [.., name, marker] if marker == CHECKPOINTS_SEGMENT && is_document(name) => {
                Self::Checkpoints { dir: dir_of(segments.len() - 2)?, name: name.clone() }
            }
            [.., name, marker, id] if marker == CHECKPOINTS_SEGMENT && is_document(name) => {
                Self::Checkpoint {
                    dir: dir_of(segments.len() - 3)?,
                    name: name.clone(),
                    id: id.clone(),
                }
            }
            [.., name] if is_document(name) => {
                Self::Document { dir: dir_of(segments.len() - 1)?, name: name.clone() }
            }
            _ => Self::Directory(path.clone()),
        };
        Ok(target)
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CopyQuery {
    copy: Option<String>,
}

pub(crate) async fn get_contents(State(store): State<ContentsStore>, uri: Uri) -> ApiResult {
    match Target::parse(&uri, &store)? {
        Target::Directory(dir) => Ok(Json(store.list(&dir).await?).into_response()),
        Target::Document { dir, name } => Ok(Json(store.read(&dir, &name).await?).into_response()),
        Target::Checkpoints { dir, name } => {
            Ok(Json(store.checkpoints().list(&dir, &name).await?).into_response())
        }
        Target::Checkpoint { .. } => Err(method_not_allowed("GET", "a checkpoint")),
    }
}

pub(crate) async fn post_contents(
    State(store): State<ContentsStore>,
    uri: Uri,
    Query(query): Query<CopyQuery>,
    body: Bytes,
) -> ApiResult {
    match Target::parse(&uri, &store)? {
        Target::Directory(dir) => {
            let request = parse_body(&body)?.unwrap_or_default();
            let model = match query.copy {
                Some(source) => {
                    let source = copy_source(&dir, &source)?;
                    store.copy(&dir, &source, None).await?
                }
                None => {
                    store
                        .create(&dir, request.name.as_deref(), request.document_content())
                        .await?
                }
            };
            Ok(created(&model))
        }
        Target::Document { .. } => Err(ApiError::validation(
            "POST creates documents in a directory; use PUT to create a named document",
        )),
        Target::Checkpoints { dir, name } => {
            let checkpoint = store.checkpoints().create(&dir, &name).await?;
            let location = checkpoint_location(&dir, &name, &checkpoint);
            Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(checkpoint))
                .into_response())
        }
        Target::Checkpoint { dir, name, id } => {
            store.checkpoints().restore(&dir, &name, &id).await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

pub(crate) async fn put_contents(
    State(store): State<ContentsStore>,
    uri: Uri,
    Query(query): Query<CopyQuery>,
    body: Bytes,
) -> ApiResult {
    let (dir, name) = match Target::parse(&uri, &store)? {
        Target::Document { dir, name } => (dir, name),
        Target::Directory(_) => {
            return Err(ApiError::validation("PUT requires a document name with a known extension"))
        }
        Target::Checkpoints { .. } | Target::Checkpoint { .. } => {
            return Err(method_not_allowed("PUT", "checkpoints"))
        }
    };

    if let Some(source) = query.copy {
        let source = copy_source(&dir, &source)?;
        let model = store.copy(&dir, &source, Some(&name)).await?;
        return Ok(created(&model));
    }

    let Some(request) = parse_body(&body)? else {
        let model = store.create(&dir, Some(&name), None).await?;
        return Ok(created(&model));
    };

    let new_dir = request.path.as_deref().map(VirtualPath::parse).transpose()?;
    let new_name = request.name.as_deref().map(normalize_segment).transpose()?;
    let new_name = new_name.as_deref();
    let moved = new_dir.as_ref().is_some_and(|new_dir| *new_dir != dir)
        || new_name.is_some_and(|new_name| new_name != name);

    if !store.exists(&dir, &name).await? {
        let model = store.create(&dir, Some(&name), request.document_content()).await?;
        return Ok(created(&model));
    }

    let model = match request.document_content() {
        Some(content) => store.save(&dir, &name, content, new_name, new_dir.as_ref()).await?,
        None if moved => {
            let new_dir = new_dir.unwrap_or_else(|| dir.clone());
            store.move_to(&dir, &name, &new_dir, new_name.unwrap_or(&name)).await?
        }
        None => return Err(ApiError::validation("saving requires `content`")),
    };

    if moved {
        Ok(created(&model))
    } else {
        Ok(Json(model).into_response())
    }
}

pub(crate) async fn patch_contents(
    State(store): State<ContentsStore>,
    uri: Uri,
    body: Bytes,
) -> ApiResult {
    let Target::Document { dir, name } = Target::parse(&uri, &store)? else {
        return Err(method_not_allowed("PATCH", "anything but a document"));
    };
    let request = parse_body(&body)?.unwrap_or_default();
    if request.name.is_none() && request.path.is_none() {
        return Err(ApiError::validation("renaming requires `name` or `path`"));
    }

    let new_dir = match request.path.as_deref() {
        Some(path) => VirtualPath::parse(path)?,
        None => dir.clone(),
    };
    let new_name = request.name.as_deref().unwrap_or(&name);
    let model = store.move_to(&dir, &name, &new_dir, new_name).await?;

    let location = document_location(&model);
    Ok((StatusCode::OK, [(header::LOCATION, location)], Json(model)).into_response())
}

pub(crate) async fn delete_contents(State(store): State<ContentsStore>, uri: Uri) -> ApiResult {
    match Target::parse(&uri, &store)? {
        Target::Document { dir, name } => store.delete(&dir, &name).await?,
        Target::Checkpoint { dir, name, id } => {
            store.checkpoints().delete(&dir, &name, &id).await?
        }
        Target::Directory(_) => return Err(method_not_allowed("DELETE", "a directory")),
        Target::Checkpoints { .. } => {
            return Err(method_not_allowed("DELETE", "a checkpoint collection"))
        }
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Parse an optional JSON body; an empty body is `None`.
fn parse_body(body: &Bytes) -> Result<Option<SaveRequest>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| ApiError::validation(format!("malformed JSON body: {e}")))
}

/// Name of a copy source given as a bare name or a path inside `dir`.
fn copy_source(dir: &VirtualPath, source: &str) -> Result<String, ApiError> {
    let source = VirtualPath::parse(source)?;
    match source.split_last() {
        Some((parent, name)) if parent.is_root() || parent == *dir => Ok(name.to_string()),
        Some(_) => Err(ApiError::validation("copy source must be in the target directory")),
        None => Err(ApiError::validation("copy source must name a document")),
    }
}

fn created(model: &DocumentModel) -> Response {
    let location = document_location(model);
    (StatusCode::CREATED, [(header::LOCATION, location)], Json(model)).into_response()
}

fn document_location(model: &DocumentModel) -> String {
    url_path_join(&[API_BASE, url_escape(&model.path).as_str(), url_escape(&model.name).as_str()])
}

fn checkpoint_location(dir: &VirtualPath, name: &str, checkpoint: &CheckpointModel) -> String {
    url_path_join(&[
        API_BASE,
        url_escape(&dir.to_string()).as_str(),
        url_escape(name).as_str(),
        CHECKPOINTS_SEGMENT,
        url_escape(&checkpoint.id).as_str(),
    ])
}

fn method_not_allowed(method: &str, what: &str) -> ApiError {
    ApiError::new(ErrorCode::MethodNotAllowed, format!("{method} is not supported on {what}"))
}
