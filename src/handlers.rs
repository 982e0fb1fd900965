use axum::{
    async_trait,
    extract::{FromRequest, Multipart, Request, State},
    http::header,
    Form, Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use crate::translate::translate_first;

#[derive(Debug, Deserialize)]
pub struct TranslateForm {
    pub text: String,
    pub language: String,
}

/// Accepts the fields either url-encoded or as `multipart/form-data`, the
/// latter being what browsers send for a `FormData` body.
#[async_trait]
impl<S> FromRequest<S> for TranslateForm
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|rejection| ApiError::Unprocessable(rejection.body_text()))?;
            read_multipart(multipart).await
        } else {
            let Form(form) = Form::<TranslateForm>::from_request(req, state)
                .await
                .map_err(|rejection| ApiError::Unprocessable(rejection.body_text()))?;
            Ok(form)
        }
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<TranslateForm, ApiError> {
    let unreadable = |err: axum::extract::multipart::MultipartError| ApiError::Unprocessable(err.body_text());

    let mut text = None;
    let mut language = None;
    while let Some(field) = multipart.next_field().await.map_err(unreadable)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("text") => text = Some(field.text().await.map_err(unreadable)?),
            Some("language") => language = Some(field.text().await.map_err(unreadable)?),
            _ => {}
        }
    }

    let missing = |name: &str| ApiError::Unprocessable(format!("missing form field `{name}`"));
    Ok(TranslateForm {
        text: text.ok_or_else(|| missing("text"))?,
        language: language.ok_or_else(|| missing("language"))?,
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TranslateResponse {
    pub translated_text: String,
}

pub async fn translate(
    State(state): State<AppState>,
    form: TranslateForm,
) -> Result<Json<TranslateResponse>, ApiError> {
    validate_text(&form.text, state.max_input_chars)?;
    let translator = state.registry.get(&form.language)?;

    let span = info_span!("translate", request_id = %Uuid::new_v4(), language = %form.language);
    async move {
        info!("Translating {} characters", form.text.chars().count());
        let translated_text = translate_first(translator.as_ref(), &form.text).await?;
        Ok::<_, ApiError>(Json(TranslateResponse { translated_text }))
    }
    .instrument(span)
    .await
}

fn validate_text(text: &str, max_chars: usize) -> Result<(), ApiError> {
    if text.is_empty() {
        return Err(ApiError::BadRequest("Text input cannot be empty".to_string()));
    }
    // Counted in characters, not bytes.
    if text.chars().count() > max_chars {
        return Err(ApiError::BadRequest(format!(
            "Text input is too long, maximum length is {max_chars} characters"
        )));
    }
    Ok(())
}
