use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use url::Url;
use xslt_assembler::{Assembler, AssemblerConfig, XsltError};

/// Path of an optional JSON configuration file.
const CONFIG_ENV: &str = "XSLT_ASSEMBLE_CONFIG";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(target) = std::env::args().nth(1) else {
        eprintln!("usage: xslt-assemble <stylesheet URL or path>");
        return ExitCode::from(2);
    };

    match assemble(&target).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(error = %error, "assembly failed");
            ExitCode::FAILURE
        }
    }
}

async fn assemble(target: &str) -> xslt_assembler::Result<String> {
    let config = match std::env::var(CONFIG_ENV) {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| XsltError::Config(format!("{path}: {e}")))?;
            AssemblerConfig::from_json(&json)?
        }
        Err(_) => AssemblerConfig::default(),
    };

    let url = to_url(target)?;
    let mut assembler = Assembler::with_http(config)?;
    let id = assembler.create_stylesheet();
    assembler.load(id, url.as_str())?;
    assembler.run().await?;

    if let Some(error) = assembler.document(id)?.errors().first() {
        return Err(error.clone());
    }
    assembler
        .tree(id)
        .map(xslt_core::XmlTree::serialize)
        .ok_or_else(|| XsltError::Config(format!("{target} produced no stylesheet")))
}

/// Accepts absolute URLs as-is and turns anything else into a `file://` URL.
fn to_url(target: &str) -> xslt_assembler::Result<Url> {
    if let Ok(url) = Url::parse(target)
        && url.scheme().len() > 1
    {
        return Ok(url);
    }
    let path = Path::new(target)
        .canonicalize()
        .map_err(|e| XsltError::Config(format!("{target}: {e}")))?;
    Url::from_file_path(&path)
        .map_err(|()| XsltError::Config(format!("{} is not an absolute path", path.display())))
}
