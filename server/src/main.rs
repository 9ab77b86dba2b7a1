//! HTTP front end for fingerprint similarity queries.
//!
//! Accepts POSTed form queries, fingerprints the SMILES, fans the query out
//! over one backend channel per database, and returns JSON in one of two
//! historical shapes. Backend search processes are launched separately and
//! listen on `/tmp/<dbname>`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use hyper::server::Server;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use log::{error, info};
use serde_json::json;

use fsim::channel::{Channel, ChannelConfig, ResponseMode};
use fsim::data::{Fingerprinter, HashedFingerprinter, DEFAULT_BITCOUNT};
use fsim::error::Error;
use fsim::fanout::{fan_out_search, FanOutTarget};
use fsim::protocol::SearchHit;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database names to serve; each maps to a backend socket /tmp/<name>
    #[arg(required = true)]
    dbnames: Vec<String>,

    /// Hostname to run on
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Port to run on
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Directory the backend allocates shared response regions in;
    /// omit to read responses echoed on the socket instead
    #[arg(long)]
    region_dir: Option<PathBuf>,

    /// Optional YAML channel configuration (timeouts, retry bounds)
    #[arg(long)]
    config: Option<String>,

    /// Fingerprint width in bits, must match the backend's databases
    #[arg(long, default_value_t = DEFAULT_BITCOUNT)]
    bit_count: usize,
}

/// Which JSON shape the caller asked for. Selected only at the
/// serialization boundary; the internal result stays uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ResponseShape {
    /// version 1: a bare list of [id, smiles, score] rows
    FlatList,
    /// version 2: {"approximate_count": n, "results": [...]}
    Versioned,
}

#[derive(Debug)]
struct QueryForm {
    smiles: String,
    return_count: u32,
    similarity_cutoff: f32,
    targets: Vec<(String, String)>,
    shape: ResponseShape,
}

struct ServerState {
    config: ChannelConfig,
    mode: ResponseMode,
    fingerprinter: HashedFingerprinter,
    /// Channels are dialed lazily and evicted on failure so the next
    /// request reconnects after a backend restart.
    channels: Mutex<HashMap<String, Arc<Channel<UnixStream>>>>,
}

impl ServerState {
    fn channel_for(&self, name: &str) -> Result<Arc<Channel<UnixStream>>, Error> {
        let mut channels = self.channels.lock().unwrap();
        if let Some(channel) = channels.get(name) {
            return Ok(channel.clone());
        }
        let channel = Arc::new(Channel::connect(name, self.mode.clone(), self.config.clone())?);
        channels.insert(name.to_string(), channel.clone());
        Ok(channel)
    }

    fn evict(&self, names: &[(String, String)]) {
        let mut channels = self.channels.lock().unwrap();
        for (name, _) in names {
            channels.remove(name);
        }
    }
}

fn parse_form(body: &[u8]) -> Result<QueryForm, String> {
    let mut fields: HashMap<String, String> = HashMap::new();
    for (key, value) in form_urlencoded::parse(body) {
        fields.insert(key.into_owned(), value.into_owned());
    }

    let smiles = fields
        .get("smiles")
        .ok_or("missing field: smiles")?
        .trim()
        .to_string();
    let return_count = fields
        .get("return_count")
        .ok_or("missing field: return_count")?
        .parse::<u32>()
        .map_err(|e| format!("bad return_count: {}", e))?;
    let similarity_cutoff = fields
        .get("similarity_cutoff")
        .ok_or("missing field: similarity_cutoff")?
        .parse::<f32>()
        .map_err(|e| format!("bad similarity_cutoff: {}", e))?;
    if !(0.0..=1.0).contains(&similarity_cutoff) {
        return Err(format!("similarity_cutoff {} outside [0, 1]", similarity_cutoff));
    }

    let dbnames: Vec<String> = fields
        .get("dbnames")
        .ok_or("missing field: dbnames")?
        .split(',')
        .map(|s| s.to_string())
        .collect();
    let dbkeys: Vec<String> = match fields.get("dbkeys") {
        Some(raw) => raw.split(',').map(|s| s.to_string()).collect(),
        None => vec![String::new(); dbnames.len()],
    };
    if dbkeys.len() != dbnames.len() {
        return Err("need a key for each database".to_string());
    }

    let shape = match fields.get("version").map(|s| s.as_str()).unwrap_or("1") {
        "1" => ResponseShape::FlatList,
        "2" => ResponseShape::Versioned,
        other => return Err(format!("unknown response version: {}", other)),
    };

    Ok(QueryForm {
        smiles,
        return_count,
        similarity_cutoff,
        targets: dbnames.into_iter().zip(dbkeys).collect(),
        shape,
    })
}

fn run_search(state: &ServerState, form: &QueryForm) -> Result<(u64, Vec<SearchHit>), Error> {
    let (fingerprint, _canonical) = state.fingerprinter.fingerprint(&form.smiles, false)?;

    let mut channels: Vec<Arc<Channel<UnixStream>>> = Vec::with_capacity(form.targets.len());
    for (name, _) in &form.targets {
        channels.push(state.channel_for(name)?);
    }
    let targets: Vec<FanOutTarget<Channel<UnixStream>>> = channels
        .iter()
        .zip(&form.targets)
        .map(|(channel, (name, key))| FanOutTarget {
            backend: channel.as_ref(),
            db_name: name.clone(),
            db_key: key.clone(),
        })
        .collect();

    let result = fan_out_search(&targets, form.return_count, form.similarity_cutoff, &fingerprint);
    if result.is_err() {
        // one bad shard invalidates every channel the query touched
        state.evict(&form.targets);
    }
    result
}

/// Mirror of the reference server's synthesized error row: the serving
/// process survives a failed backend, the caller gets a sentinel result.
fn server_error_result() -> (u64, Vec<SearchHit>) {
    (
        1,
        vec![SearchHit {
            id: "SERVER_ERROR_ON_SEARCH".to_string(),
            smiles: "CC".to_string(),
            score: 0.0,
        }],
    )
}

fn results_to_json(shape: ResponseShape, approximate: u64, hits: &[SearchHit]) -> serde_json::Value {
    let rows: Vec<serde_json::Value> =
        hits.iter().map(|h| json!([h.id, h.smiles, h.score])).collect();
    match shape {
        ResponseShape::FlatList => json!(rows),
        ResponseShape::Versioned => json!({
            "approximate_count": approximate,
            "results": rows,
        }),
    }
}

fn plain_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(message.to_string()))
        .unwrap()
}

async fn handle(req: Request<Body>, state: Arc<ServerState>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST || !req.uri().path().starts_with("/similarity_search_json") {
        return Ok(plain_response(StatusCode::NOT_FOUND, "Server unavailable."));
    }

    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(body) => body,
        Err(e) => return Ok(plain_response(StatusCode::BAD_REQUEST, &format!("bad body: {}", e))),
    };
    let form = match parse_form(&body) {
        Ok(form) => form,
        Err(msg) => return Ok(plain_response(StatusCode::BAD_REQUEST, &msg)),
    };
    let shape = form.shape;

    let search_state = state.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        let result = run_search(&search_state, &form);
        (form, result)
    })
    .await;

    let (approximate, hits) = match outcome {
        Ok((_, Ok(result))) => result,
        Ok((form, Err(e))) => {
            error!("search over {:?} failed: {}", form.targets, e);
            server_error_result()
        }
        Err(e) => {
            error!("search task failed: {}", e);
            server_error_result()
        }
    };

    let payload = results_to_json(shape, approximate, &hits);
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/json")
        .body(Body::from(payload.to_string()))
        .unwrap())
}

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ChannelConfig::from_file(path)?,
        None => ChannelConfig::default(),
    };
    let mode = match &args.region_dir {
        Some(dir) => ResponseMode::SharedRegion { dir: dir.clone() },
        None => ResponseMode::Socket,
    };

    info!("serving databases {:?} in {:?} mode", args.dbnames, mode);

    let state = Arc::new(ServerState {
        config,
        mode,
        fingerprinter: HashedFingerprinter::new(args.bit_count)?,
        channels: Mutex::new(HashMap::new()),
    });

    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let state = state.clone();
                handle(req, state)
            }))
        }
    });

    let addr = format!("{}:{}", args.hostname, args.port).parse()?;
    let server = Server::bind(&addr).serve(make_svc);

    println!("Listening on http://{}", addr);

    server.await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_parsing() {
        let body = b"smiles=CCO&return_count=20&similarity_cutoff=0.5&dbnames=zinc,enamine&dbkeys=a,b&version=2";
        let form = parse_form(body).unwrap();
        assert_eq!(form.smiles, "CCO");
        assert_eq!(form.return_count, 20);
        assert_eq!(form.shape, ResponseShape::Versioned);
        assert_eq!(
            form.targets,
            vec![
                ("zinc".to_string(), "a".to_string()),
                ("enamine".to_string(), "b".to_string())
            ]
        );

        // keys default to empty, one per database
        let body = b"smiles=CCO&return_count=5&similarity_cutoff=0&dbnames=zinc";
        let form = parse_form(body).unwrap();
        assert_eq!(form.shape, ResponseShape::FlatList);
        assert_eq!(form.targets, vec![("zinc".to_string(), String::new())]);
    }

    #[test]
    fn form_rejects_key_count_mismatch() {
        let body = b"smiles=CCO&return_count=5&similarity_cutoff=0&dbnames=a,b&dbkeys=only_one";
        assert!(parse_form(body).is_err());
    }

    #[test]
    fn form_rejects_out_of_range_cutoff() {
        let body = b"smiles=CCO&return_count=5&similarity_cutoff=1.5&dbnames=a";
        assert!(parse_form(body).is_err());
    }

    #[test]
    fn json_shapes() {
        let hits = vec![
            SearchHit { id: "id2".to_string(), smiles: "CCC".to_string(), score: 0.95 },
            SearchHit { id: "id1".to_string(), smiles: "CC".to_string(), score: 0.9 },
        ];

        let v1 = results_to_json(ResponseShape::FlatList, 8, &hits);
        assert!(v1.is_array());
        assert_eq!(v1[0][0], "id2");
        assert_eq!(v1[0][1], "CCC");

        let v2 = results_to_json(ResponseShape::Versioned, 8, &hits);
        assert_eq!(v2["approximate_count"], 8);
        assert_eq!(v2["results"][1][0], "id1");
    }
}
