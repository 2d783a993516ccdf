use crate::api::{ModelInfo, ModelsResponse};
use crate::utils::url::construct_api_url;

/// Lists the models installed on the Ollama server (`GET /api/tags`).
pub async fn fetch_models(
    client: &reqwest::Client,
    base_url: &str,
) -> Result<ModelsResponse, Box<dyn std::error::Error>> {
    let models_url = construct_api_url(base_url, "api/tags");
    let response = client
        .get(models_url)
        .header("Content-Type", "application/json")
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(format!("API request failed with status {status}: {error_text}").into());
    }

    let models_response = response.json::<ModelsResponse>().await?;
    Ok(models_response)
}

pub fn sort_models(models: &mut [ModelInfo]) {
    // Most recently pulled first; ties and undated entries fall back to name.
    models.sort_by(|a, b| match (&a.modified_at, &b.modified_at) {
        (Some(a_modified), Some(b_modified)) => b_modified
            .cmp(a_modified)
            .then_with(|| a.name.cmp(&b.name)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    });
}
