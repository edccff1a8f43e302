//! `client`: a one-shot CLI issuing a single request against a running
//! gossiper's HTTP read-model (spec §6 "CLI surface (client)").

use clap::Parser;
use peerchain::cli::{ClientOperation, ClientOpts};
use serde::Serialize;

#[derive(Serialize)]
struct PostMessage<'a> {
  text: &'a str,
}

fn base_url(ui_port: u16) -> String {
  format!("http://127.0.0.1:{ui_port}")
}

fn run(opts: &ClientOpts) -> Result<(), String> {
  let operation = opts.operation()?;
  let client = reqwest::blocking::Client::new();
  let base = base_url(opts.ui_port);

  match operation {
    ClientOperation::Broadcast { text } => {
      let resp = client
        .post(format!("{base}/message"))
        .json(&PostMessage { text: &text })
        .send()
        .map_err(|e| e.to_string())?;
      if !resp.status().is_success() {
        return Err(format!("gossiper rejected message: {}", resp.status()));
      }
    }
    ClientOperation::Private { to, text } => {
      let resp = client
        .post(format!("{base}/private/{to}"))
        .json(&PostMessage { text: &text })
        .send()
        .map_err(|e| e.to_string())?;
      if !resp.status().is_success() {
        return Err(format!("gossiper rejected private message: {}", resp.status()));
      }
    }
    ClientOperation::Search { keywords, budget } => {
      // Legacy file-search surface (spec §1 Non-goals): the read-model
      // accepts the request but never returns a match.
      let resp = client
        .get(format!("{base}/search"))
        .query(&[("keywords", keywords.as_str()), ("budget", &budget.to_string())])
        .send()
        .map_err(|e| e.to_string())?;
      if !resp.status().is_success() {
        return Err(format!("search request failed: {}", resp.status()));
      }
      println!("no results (legacy file-search is inert)");
    }
    ClientOperation::Request { hash } => {
      hex::decode(&hash).map_err(|_| "bad hex hash in --request".to_string())?;
      println!("no data held for hash {hash} (legacy file-share is inert)");
    }
  }
  Ok(())
}

fn main() {
  let opts = ClientOpts::parse();
  if let Err(err) = run(&opts) {
    eprintln!("ERROR ({err})");
    std::process::exit(1);
  }
}
