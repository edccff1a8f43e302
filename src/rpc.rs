//! HTTP read-model (spec §6 "EXTERNAL INTERFACES"): a thin `axum` surface
//! over [`crate::node::Node`], grounded on the teacher's `rpc/service.rs`
//! JSON-over-HTTP shape (route table, `Json<T>` extractors, shared state
//! via `Extension`, served with `axum::Server::bind(...).serve(...)`).

use std::sync::Arc;

use axum::{
  extract::{Extension, Path, Query},
  http::StatusCode,
  routing::{get, post},
  Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
  model::Origin,
  node::Node,
  peer::PeerAddr,
  registry::PollRecord,
  tx::{PollTx, ResultTx, Transaction, VoteTx},
};

pub fn router(node: Arc<Node>) -> Router {
  Router::new()
    .route("/id", get(get_id))
    .route("/message", get(get_messages).post(post_message))
    .route("/node", get(get_nodes).post(post_node))
    .route("/dsdv", get(get_dsdv))
    .route("/private/:origin", get(get_private).post(post_private))
    .route("/voting/polls", get(get_polls).post(post_poll))
    .route("/voting/poll/:id/vote", post(post_vote))
    .route("/voting/poll/:id/count", post(post_count))
    .route("/round", get(get_round))
    .route("/search", get(get_search))
    .route("/route", get(get_route))
    .layer(Extension(node))
}

async fn get_id(Extension(node): Extension<Arc<Node>>) -> Json<String> {
  Json(node.self_origin.to_string())
}

#[derive(Serialize)]
struct MessageView {
  origin: String,
  id: u32,
  text: String,
}

async fn get_messages(Extension(node): Extension<Arc<Node>>) -> Json<Vec<MessageView>> {
  let messages = node
    .messages()
    .await
    .into_iter()
    .map(|(origin, id, text)| MessageView {
      origin: origin.to_string(),
      id,
      text,
    })
    .collect();
  Json(messages)
}

#[derive(Deserialize)]
struct PostMessage {
  text: String,
}

async fn post_message(
  Extension(node): Extension<Arc<Node>>,
  Json(body): Json<PostMessage>,
) -> StatusCode {
  node.submit_chat(body.text).await;
  StatusCode::ACCEPTED
}

async fn get_nodes(Extension(node): Extension<Arc<Node>>) -> Json<Vec<String>> {
  Json(node.peers.snapshot().into_iter().map(|p| p.to_string()).collect())
}

#[derive(Deserialize)]
struct PostNode {
  peer: String,
}

async fn post_node(
  Extension(node): Extension<Arc<Node>>,
  Json(body): Json<PostNode>,
) -> Result<StatusCode, StatusCode> {
  let peer: PeerAddr = body.peer.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
  node.add_peer(peer);
  Ok(StatusCode::ACCEPTED)
}

#[derive(Serialize)]
struct DsdvEntry {
  origin: String,
  next_hop: String,
}

async fn get_dsdv(Extension(node): Extension<Arc<Node>>) -> Json<Vec<DsdvEntry>> {
  let entries = node
    .dsdv()
    .into_iter()
    .map(|(origin, peer)| DsdvEntry {
      origin: origin.to_string(),
      next_hop: peer.to_string(),
    })
    .collect();
  Json(entries)
}

#[derive(Deserialize)]
struct RouteQuery {
  dest: String,
}

async fn get_route(
  Extension(node): Extension<Arc<Node>>,
  Query(query): Query<RouteQuery>,
) -> Result<Json<String>, StatusCode> {
  node
    .dsdv()
    .into_iter()
    .find(|(origin, _)| origin.to_string() == query.dest)
    .map(|(_, peer)| Json(peer.to_string()))
    .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Serialize)]
struct PrivateView {
  from: String,
  text: String,
}

async fn get_private(
  Extension(node): Extension<Arc<Node>>,
  Path(origin): Path<String>,
) -> Json<Vec<PrivateView>> {
  let conversation = node
    .private_conversation(&Origin::new(origin))
    .await
    .into_iter()
    .map(|m| PrivateView {
      from: m.from.to_string(),
      text: m.text,
    })
    .collect();
  Json(conversation)
}

#[derive(Deserialize)]
struct PostPrivate {
  text: String,
}

async fn post_private(
  Extension(node): Extension<Arc<Node>>,
  Path(origin): Path<String>,
  Json(body): Json<PostPrivate>,
) -> Result<StatusCode, StatusCode> {
  node
    .submit_private(Origin::new(origin), body.text)
    .await
    .map(|_| StatusCode::ACCEPTED)
    .map_err(|_| StatusCode::NOT_FOUND)
}

#[derive(Serialize)]
struct PollView {
  id: u32,
  origin: String,
  question: String,
  voters: Vec<String>,
  deadline: chrono::DateTime<chrono::Utc>,
  vote_count: usize,
  closed_result: Option<u64>,
}

impl From<PollRecord> for PollView {
  fn from(p: PollRecord) -> Self {
    Self {
      id: p.id,
      origin: p.origin.to_string(),
      question: p.question,
      voters: p.voters.into_iter().map(|o| o.to_string()).collect(),
      deadline: p.deadline,
      vote_count: p.votes.len(),
      closed_result: p.closed_result,
    }
  }
}

async fn get_polls(Extension(node): Extension<Arc<Node>>) -> Json<Vec<PollView>> {
  Json(node.registry.all_polls().into_iter().map(PollView::from).collect())
}

async fn submit_tx(node: &Arc<Node>, tx: Transaction) -> StatusCode {
  match node.submit_transaction(tx).await {
    Ok(()) => StatusCode::ACCEPTED,
    Err(_) => StatusCode::BAD_REQUEST,
  }
}

async fn post_poll(Extension(node): Extension<Arc<Node>>, Json(body): Json<PollTx>) -> StatusCode {
  submit_tx(&node, Transaction::Poll(body)).await
}

async fn post_vote(
  Extension(node): Extension<Arc<Node>>,
  Path(id): Path<u32>,
  Json(body): Json<VoteTx>,
) -> StatusCode {
  if body.poll_id != id {
    return StatusCode::BAD_REQUEST;
  }
  submit_tx(&node, Transaction::Vote(body)).await
}

async fn post_count(
  Extension(node): Extension<Arc<Node>>,
  Path(id): Path<u32>,
  Json(body): Json<ResultTx>,
) -> StatusCode {
  if body.poll_id != id {
    return StatusCode::BAD_REQUEST;
  }
  submit_tx(&node, Transaction::Result(body)).await
}

async fn get_round(Extension(node): Extension<Arc<Node>>) -> Json<Option<u32>> {
  Json(node.round())
}

/// Legacy file-search surface (spec §1 Non-goals): accepted, always
/// empty.
async fn get_search() -> Json<Vec<String>> {
  Json(Vec::new())
}
