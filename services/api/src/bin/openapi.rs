//! services/api/src/bin/openapi.rs
//!
//! Writes the REST API's OpenAPI 3.0 specification to `openapi.json`, for
//! client generation without starting the server.

use api_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let spec = ApiDoc::openapi().to_pretty_json()?;
    std::fs::write("openapi.json", spec)?;
    println!("OpenAPI specification written to openapi.json");
    Ok(())
}
