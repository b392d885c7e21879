use reqwest::Client;
use scraper::{Html, Selector};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::error::OptionsError;
use crate::options::{OptionItem, SearchOptions};

/// Read every named `<select>` of the search form
pub fn parse_search_page(html: &str) -> SearchOptions {
    let (select_selector, option_selector) = match (Selector::parse("select"), Selector::parse("option")) {
        (Ok(select), Ok(option)) => (select, option),
        (Err(e), _) | (_, Err(e)) => {
            error!("Invalid option selector: {:?}", e);
            return SearchOptions::default();
        }
    };

    let document = Html::parse_document(html);
    let mut options = SearchOptions::default();

    for select in document.select(&select_selector) {
        let element = select.value();
        let Some(field) = element.attr("name").or_else(|| element.attr("id")) else {
            continue;
        };

        let items: Vec<OptionItem> = select
            .select(&option_selector)
            .map(|option| {
                let text = option.text().collect::<String>().trim().to_string();
                let value = option
                    .value()
                    .attr("value")
                    .map(|v| v.trim().to_string())
                    .unwrap_or_else(|| text.clone());
                OptionItem { value, text }
            })
            .collect();

        debug!("Select '{}' has {} option(s)", field, items.len());
        options.lists.insert(field.to_string(), items);
    }

    options
}

/// Download the search page and read its option lists
pub async fn refresh_search_options(client: &Client, url: &str) -> Result<SearchOptions, OptionsError> {
    info!("Refreshing search options from {}", url);
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(OptionsError::Status(response.status().as_u16()));
    }

    let options = parse_search_page(&response.text().await?);
    if options.is_empty() {
        return Err(OptionsError::NoOptions);
    }
    info!("Search page offered {} option list(s)", options.lists.len());
    Ok(options)
}

/// Run [`refresh_search_options`] in the background; the receiver fires once
pub fn spawn_search_refresh(
    client: Client,
    url: String,
) -> oneshot::Receiver<Result<SearchOptions, OptionsError>> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = tx.send(refresh_search_options(&client, &url).await);
    });
    rx
}
