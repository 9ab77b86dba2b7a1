//! Interactive smoke-test client: reads SMILES from stdin, queries a
//! backend over its local socket, prints the scored matches.

use std::io::{self, BufRead, Write};

use fsim::channel::{Channel, ChannelConfig, ResponseMode};
use fsim::data::{Fingerprinter, HashedFingerprinter, DEFAULT_BITCOUNT};
use fsim::protocol::{random_request_id, QueryRequest};

const RETURN_COUNT: u32 = 20;

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let dbname = args.next().expect("usage: query_test <dbname> [dbkey]");
    let dbkey = args.next().unwrap_or_default();

    let channel = match Channel::connect(&dbname, ResponseMode::Socket, ChannelConfig::default()) {
        Ok(channel) => channel,
        Err(e) => {
            eprintln!("could not reach backend {}: {}", dbname, e);
            std::process::exit(1);
        }
    };

    let fingerprinter = HashedFingerprinter::new(DEFAULT_BITCOUNT).unwrap();
    let stdin = io::stdin();

    loop {
        print!("Smiles: ");
        io::stdout().flush().unwrap();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap() == 0 {
            break;
        }
        let smiles = line.trim();
        if smiles.is_empty() || smiles.eq_ignore_ascii_case("quit") || smiles.eq_ignore_ascii_case("exit") {
            break;
        }

        let (fingerprint, canonical) = match fingerprinter.fingerprint(smiles, false) {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        let request = QueryRequest {
            targets: vec![(dbname.clone(), dbkey.clone())],
            request_id: random_request_id(),
            return_count: RETURN_COUNT,
            similarity_cutoff: 0.0,
            fingerprint,
        };

        match channel.query(&request) {
            Ok(response) => {
                println!(
                    "Query {}: approximate total matches {}, returning {}",
                    canonical,
                    response.approximate_total_matches,
                    response.hits.len()
                );
                for hit in &response.hits {
                    println!("{} {}: {}", hit.id, hit.smiles, hit.score);
                }
            }
            Err(e) => eprintln!("query failed: {}", e),
        }
    }
}
