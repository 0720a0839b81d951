use dialectify_rs::config::{load_config, AppConfig};
use dialectify_rs::error::{format_error, DialectifyError};
use dialectify_rs::observability::init_tracing;
use dialectify_rs::protocol::canonical::{CanonicalRequest, IngressApi};
use dialectify_rs::{LlamaServerBackend, Pipeline};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const USAGE: &str = "usage: dialectify [config.yaml] <request.json> [messages|chat]";

struct Invocation {
    config_path: String,
    request_path: String,
    protocol: IngressApi,
}

fn parse_args(args: &[String]) -> Option<Invocation> {
    let (config_path, request_path, protocol) = match args {
        [request] => (DEFAULT_CONFIG_PATH, request, None),
        [first, second] => match IngressApi::parse_label(second) {
            Some(protocol) => (DEFAULT_CONFIG_PATH, first, Some(protocol)),
            None => (first.as_str(), second, None),
        },
        [config, request, protocol] => {
            (config.as_str(), request, Some(IngressApi::parse_label(protocol)?))
        }
        _ => return None,
    };
    Some(Invocation {
        config_path: config_path.to_string(),
        request_path: request_path.clone(),
        protocol: protocol.unwrap_or(IngressApi::Anthropic),
    })
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(invocation) = parse_args(&args) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let config = load_config(&invocation.config_path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level);

    let request = read_request(&invocation.request_path).unwrap_or_else(|e| {
        eprintln!("Failed to read request '{}': {e}", invocation.request_path);
        let (_, body) = format_error(&e, invocation.protocol);
        println!("{body}");
        std::process::exit(1);
    });

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    if let Err(e) = runtime.block_on(run(config, request, invocation.protocol)) {
        eprintln!("Failed to write response: {e}");
        std::process::exit(1);
    }
}

fn read_request(path: &str) -> Result<CanonicalRequest, DialectifyError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| DialectifyError::InvalidRequest(e.to_string()))?;
    serde_json::from_str(&contents).map_err(|e| DialectifyError::InvalidRequest(e.to_string()))
}

async fn run(config: AppConfig, request: CanonicalRequest, protocol: IngressApi) -> std::io::Result<()> {
    let backend = LlamaServerBackend::new(&config.backend, config.generation_defaults())
        .unwrap_or_else(|e| {
            eprintln!("{e}");
            std::process::exit(1);
        });
    let pipeline = Pipeline::new(backend, &config);
    tracing::info!(
        model = %request.model,
        protocol = ?protocol,
        stream = request.stream,
        "dialectify starting"
    );

    let mut stdout = tokio::io::stdout();
    if request.stream {
        let mut events = pipeline.stream(&request, protocol).await;
        if let Some(status) = events.budget_status() {
            tracing::info!(status, "context budget");
        }
        while let Some(event) = events.next().await {
            stdout.write_all(event.to_sse().as_bytes()).await?;
            stdout.flush().await?;
        }
    } else {
        let response = pipeline.complete(&request, protocol).await;
        let body = serde_json::to_string_pretty(&response)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        stdout.write_all(body.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}
