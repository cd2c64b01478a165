use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::NaiveDate;
use serde::Serialize;

use crate::{
    content::{
        MAX_IMAGE_BYTES,
        dashboard::DashboardCounts,
        events::{Event, EventInput},
        news::{NewsInput, NewsPost},
        photos::Photo,
    },
    gateway::RecordId,
    web::{
        AppState,
        auth::authorize,
        responses::{ApiResult, content_error, field_error, form_error},
        uploads::{FileFieldConfig, FormData, FormError, FormResult, read_multipart},
    },
};

#[derive(Debug, Serialize)]
pub struct UploadedImage {
    pub url: String,
}

pub async fn dashboard(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<Json<DashboardCounts>> {
    authorize(&state, &jar)?;
    state
        .content()
        .dashboard()
        .await
        .map(Json)
        .map_err(content_error)
}

pub async fn list_news(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<Json<Vec<NewsPost>>> {
    authorize(&state, &jar)?;
    state
        .content()
        .list_news()
        .await
        .map(Json)
        .map_err(content_error)
}

pub async fn get_news(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> ApiResult<Json<NewsPost>> {
    authorize(&state, &jar)?;
    state
        .content()
        .get_news(&RecordId::new(id))
        .await
        .map(Json)
        .map_err(content_error)
}

pub async fn create_news(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(input): Json<NewsInput>,
) -> ApiResult<(StatusCode, Json<NewsPost>)> {
    authorize(&state, &jar)?;
    let post = state
        .content()
        .save_news(None, input)
        .await
        .map_err(content_error)?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn update_news(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<String>,
    Json(input): Json<NewsInput>,
) -> ApiResult<Json<NewsPost>> {
    authorize(&state, &jar)?;
    state
        .content()
        .save_news(Some(&RecordId::new(id)), input)
        .await
        .map(Json)
        .map_err(content_error)
}

pub async fn delete_news(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    authorize(&state, &jar)?;
    state
        .content()
        .delete_news(&RecordId::new(id))
        .await
        .map_err(content_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn upload_news_image(
    State(state): State<AppState>,
    jar: CookieJar,
    multipart: Multipart,
) -> ApiResult<Json<UploadedImage>> {
    authorize(&state, &jar)?;
    let mut form = read_multipart(multipart, &[FileFieldConfig::new("image", MAX_IMAGE_BYTES)])
        .await
        .map_err(form_error)?;
    let file = form
        .take_file("image")
        .ok_or_else(|| field_error("image", "choose an image to upload"))?;

    let url = state
        .content()
        .upload_news_image(file)
        .await
        .map_err(content_error)?;
    Ok(Json(UploadedImage { url }))
}

pub async fn list_events(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<Json<Vec<Event>>> {
    authorize(&state, &jar)?;
    state
        .content()
        .list_events()
        .await
        .map(Json)
        .map_err(content_error)
}

pub async fn get_event(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> ApiResult<Json<Event>> {
    authorize(&state, &jar)?;
    state
        .content()
        .get_event(&RecordId::new(id))
        .await
        .map(Json)
        .map_err(content_error)
}

pub async fn create_event(
    State(state): State<AppState>,
    jar: CookieJar,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Event>)> {
    authorize(&state, &jar)?;
    let event = save_event_form(&state, None, multipart).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn update_event(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<String>,
    multipart: Multipart,
) -> ApiResult<Json<Event>> {
    authorize(&state, &jar)?;
    let id = RecordId::new(id);
    save_event_form(&state, Some(&id), multipart).await.map(Json)
}

async fn save_event_form(
    state: &AppState,
    id: Option<&RecordId>,
    multipart: Multipart,
) -> ApiResult<Event> {
    let mut form = read_multipart(multipart, &[FileFieldConfig::new("image", MAX_IMAGE_BYTES)])
        .await
        .map_err(form_error)?;
    let input = event_input(&form).map_err(form_error)?;
    let image = form.take_file("image");

    state
        .content()
        .save_event(id, input, image)
        .await
        .map_err(content_error)
}

/// Event editor fields as sent by the multipart form.
fn event_input(form: &FormData) -> FormResult<EventInput> {
    let date = form
        .text("date")
        .map(|raw| {
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
                FormError::for_field("date", format!("`{raw}` is not a YYYY-MM-DD date"))
            })
        })
        .transpose()?;

    Ok(EventInput {
        title: form.text("title").unwrap_or_default(),
        subtitle: form.text("subtitle"),
        description: form.text("description"),
        content: form.text("content"),
        image_url: form.text("image_url"),
        date,
        time: form.text("time"),
        venue: form.text("venue"),
        is_published: form.flag("is_published")?.unwrap_or(false),
    })
}

pub async fn delete_event(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    authorize(&state, &jar)?;
    state
        .content()
        .delete_event(&RecordId::new(id))
        .await
        .map_err(content_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_photos(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<Json<Vec<Photo>>> {
    authorize(&state, &jar)?;
    state
        .content()
        .list_photos()
        .await
        .map(Json)
        .map_err(content_error)
}

pub async fn create_photo(
    State(state): State<AppState>,
    jar: CookieJar,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Photo>)> {
    authorize(&state, &jar)?;
    let mut form = read_multipart(multipart, &[FileFieldConfig::new("photo", MAX_IMAGE_BYTES)])
        .await
        .map_err(form_error)?;
    let file = form
        .take_file("photo")
        .ok_or_else(|| field_error("photo", "choose a photo to upload"))?;

    let photo = state
        .content()
        .add_photo(file, form.text("alt_text"))
        .await
        .map_err(content_error)?;
    Ok((StatusCode::CREATED, Json(photo)))
}

pub async fn delete_photo(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    authorize(&state, &jar)?;
    state
        .content()
        .delete_photo(&RecordId::new(id))
        .await
        .map_err(content_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::gateway::memory::{MemoryObjectStore, MemoryRowStore};

    fn state_with(rows: MemoryRowStore) -> AppState {
        AppState::with_stores(Arc::new(rows), Arc::new(MemoryObjectStore::new()))
    }

    #[test]
    fn event_form_parses_date_and_flags() {
        let form = FormData::default()
            .with_text("title", "Ward sabha")
            .with_text("date", "2024-05-01")
            .with_text("venue", "  Town hall ")
            .with_text("is_published", "on");
        let input = event_input(&form).unwrap();
        assert_eq!(input.date, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(input.venue.as_deref(), Some("Town hall"));
        assert!(input.is_published);
        assert_eq!(input.subtitle, None);
    }

    #[test]
    fn malformed_event_date_names_the_field() {
        let form = FormData::default()
            .with_text("title", "Ward sabha")
            .with_text("date", "01/05/2024");
        let err = event_input(&form).unwrap_err();
        assert_eq!(err.field(), Some("date"));
    }

    #[tokio::test]
    async fn content_routes_require_a_session() {
        let state = state_with(MemoryRowStore::new());
        let err = dashboard(State(state), CookieJar::new()).await.unwrap_err();
        assert_eq!(err.0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn news_validation_is_unprocessable() {
        let state = state_with(MemoryRowStore::new());
        let jar = state.admin_cookie();
        let input = NewsInput {
            title: "Hi".into(),
            summary: "Short summary".into(),
            content: "Body text".into(),
            ..NewsInput::default()
        };
        let err = create_news(State(state), jar, Json(input)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.1.field.as_deref(), Some("title"));
    }

    #[tokio::test]
    async fn missing_news_post_is_not_found() {
        let state = state_with(MemoryRowStore::new().with_rows("news", vec![]));
        let jar = state.admin_cookie();
        let err = get_news(State(state), jar, Path("99".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deleting_a_photo_returns_no_content() {
        let rows = MemoryRowStore::new().with_rows(
            "photos",
            vec![json!({
                "id": 5,
                "image_url": "https://storage.test/public/photos/photos/1_ab.jpg"
            })],
        );
        let state = state_with(rows);
        let jar = state.admin_cookie();
        let status = delete_photo(State(state.clone()), jar, Path("5".to_string()))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let gone = state.rows().select_one("photos", &RecordId::new("5")).await;
        assert!(gone.is_err());
    }
}
