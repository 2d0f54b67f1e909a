use anyhow::Result;
use chat_server::ApiDoc;
use std::fs;
use utoipa::OpenApi;

fn main() -> Result<()> {
    let doc = ApiDoc::openapi().to_pretty_json()?;
    fs::create_dir_all("chat_server/api-docs")?;
    fs::write("chat_server/api-docs/openapi.json", doc)?;
    Ok(())
}
