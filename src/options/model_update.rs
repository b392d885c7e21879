use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::oneshot;
use tracing::info;

use crate::error::OptionsError;

/// One entry of the vehicle-models endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOption {
    #[serde(rename = "Value", deserialize_with = "number_or_string")]
    pub value: String,
    #[serde(rename = "Text")]
    pub text: String,
}

impl ModelOption {
    /// Model id as used in the search payload
    pub fn id(&self) -> Option<i32> {
        self.value.trim().parse().ok()
    }
}

fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n.to_string(),
        Raw::Text(s) => s,
    })
}

/// Fetch the models the catalog knows for `make`
pub async fn update_models(client: &Client, url: &str, make: i32) -> Result<Vec<ModelOption>, OptionsError> {
    info!("Fetching models for make {}", make);
    let response = client
        .post(url)
        .form(&[("make", make.to_string())])
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(OptionsError::Status(response.status().as_u16()));
    }

    let body = response.bytes().await?;
    let models: Vec<ModelOption> = serde_json::from_slice(&body)?;
    info!("Make {} has {} model(s)", make, models.len());
    Ok(models)
}

/// Run [`update_models`] in the background; the receiver fires once
pub fn spawn_model_update(
    client: Client,
    url: String,
    make: i32,
) -> oneshot::Receiver<Result<Vec<ModelOption>, OptionsError>> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = tx.send(update_models(&client, &url, make).await);
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_models_for_make() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/GetVehicleModels/"))
            .and(body_string_contains("make=35"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"Value": -1, "Text": "All"}, {"Value": "20", "Text": "Camry"}, {"Value": 21, "Text": "Corolla"}]"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/GetVehicleModels/", server.uri());
        let models = spawn_model_update(Client::new(), url, 35).await.unwrap().unwrap();

        assert_eq!(models.len(), 3);
        assert_eq!(models[0].id(), Some(-1));
        assert_eq!(models[1], ModelOption { value: "20".to_string(), text: "Camry".to_string() });
        assert_eq!(models[2].id(), Some(21));
    }

    #[tokio::test]
    async fn test_bad_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>error</html>"))
            .mount(&server)
            .await;

        let result = update_models(&Client::new(), &server.uri(), 1).await;
        assert!(matches!(result, Err(OptionsError::Decode(_))));
    }
}
