//! Transactions: PollTx, VoteTx, RegisterTx, ResultTx (spec §3, §4.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  crypto::{self, Ciphertext, Signature, VerifyingKey},
  model::{Origin, SeqNo},
  registry::Registry,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollTx {
  pub origin: Origin,
  pub id: SeqNo,
  pub poll_id: u32,
  pub question: String,
  pub voters: Vec<Origin>,
  pub deadline: DateTime<Utc>,
  pub signature: Signature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteTx {
  pub origin: Origin,
  pub id: SeqNo,
  pub poll_id: u32,
  pub ciphertext: Ciphertext,
  pub signature: Signature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterTx {
  pub origin: Origin,
  pub id: SeqNo,
  pub public_key: VerifyingKey,
  pub signature: Signature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultTx {
  pub origin: Origin,
  pub id: SeqNo,
  pub poll_id: u32,
  pub count: u64,
  pub signature: Signature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Transaction {
  Poll(PollTx),
  Vote(VoteTx),
  Register(RegisterTx),
  Result(ResultTx),
}

impl Transaction {
  pub fn origin(&self) -> &Origin {
    match self {
      Transaction::Poll(t) => &t.origin,
      Transaction::Vote(t) => &t.origin,
      Transaction::Register(t) => &t.origin,
      Transaction::Result(t) => &t.origin,
    }
  }

  pub fn id(&self) -> SeqNo {
    match self {
      Transaction::Poll(t) => t.id,
      Transaction::Vote(t) => t.id,
      Transaction::Register(t) => t.id,
      Transaction::Result(t) => t.id,
    }
  }

  /// A stable name used by the miner to reject duplicate inclusion and
  /// by `TLCEngine::can_ack` to check "no committed block may already
  /// hold the same transaction name" (spec §4.2).
  pub fn name(&self) -> String {
    format!("{}:{}", self.origin(), self.id())
  }

  /// The bytes the detached signature is computed over. Excludes the
  /// signature field itself, matching the general "sign the payload,
  /// attach the signature" shape used throughout the spec.
  fn signed_payload(&self) -> Vec<u8> {
    match self {
      Transaction::Poll(t) => bincode::serialize(&(
        &t.origin,
        t.id,
        t.poll_id,
        &t.question,
        &t.voters,
        t.deadline,
      ))
      .expect("serialize PollTx payload"),
      Transaction::Vote(t) => {
        bincode::serialize(&(&t.origin, t.id, t.poll_id, &t.ciphertext))
          .expect("serialize VoteTx payload")
      }
      Transaction::Register(t) => {
        bincode::serialize(&(&t.origin, t.id, &t.public_key))
          .expect("serialize RegisterTx payload")
      }
      Transaction::Result(t) => {
        bincode::serialize(&(&t.origin, t.id, t.poll_id, t.count))
          .expect("serialize ResultTx payload")
      }
    }
  }

  fn signature(&self) -> &Signature {
    match self {
      Transaction::Poll(t) => &t.signature,
      Transaction::Vote(t) => &t.signature,
      Transaction::Register(t) => &t.signature,
      Transaction::Result(t) => &t.signature,
    }
  }

  /// Syntactic + signature + registration validity, as required for
  /// admission to the unconfirmed pool (spec §4.3). Does not check
  /// chain-wide uniqueness (duplicate poll ids across blocks, etc.) --
  /// that is the miner's job when it validates a snapshot against the
  /// current chain.
  pub fn validate(&self, registry: &Registry) -> Result<(), String> {
    let signer_key = match self {
      Transaction::Register(t) => Some(t.public_key),
      _ => registry.key_of(self.origin()),
    };
    let signer_key = signer_key
      .ok_or_else(|| format!("origin {} is not registered", self.origin()))?;

    if !crypto::verify(&signer_key, &self.signed_payload(), self.signature()) {
      return Err("signature verification failed".into());
    }

    match self {
      Transaction::Poll(t) => {
        if t.id != registry.next_poll_id() {
          return Err(format!(
            "poll id {} does not match expected next id {}",
            t.id,
            registry.next_poll_id()
          ));
        }
        if t.question.trim().is_empty() {
          return Err("poll question must not be empty".into());
        }
        if t.deadline <= Utc::now() {
          return Err("poll deadline must be in the future".into());
        }
        Ok(())
      }
      Transaction::Vote(t) => {
        let poll = registry
          .poll(t.poll_id)
          .ok_or_else(|| format!("poll {} does not exist", t.poll_id))?;
        if !poll.voters.contains(&t.origin) {
          return Err(format!("{} is not eligible for poll {}", t.origin, t.poll_id));
        }
        if registry.has_voted(t.poll_id, &t.origin) {
          return Err(format!("{} already voted in poll {}", t.origin, t.poll_id));
        }
        Ok(())
      }
      Transaction::Register(t) => {
        if registry.is_registered(&t.origin) {
          return Err(format!("{} is already registered", t.origin));
        }
        Ok(())
      }
      Transaction::Result(t) => {
        if !registry.poll_exists(t.poll_id) {
          return Err(format!("poll {} does not exist", t.poll_id));
        }
        let keypair = crypto::network_paillier_keypair();
        let ciphertexts = registry.ciphertexts(t.poll_id);
        let expected = crypto::paillier_decrypt_and_sum(
          &keypair.public,
          &keypair.private,
          &ciphertexts,
        );
        if expected != t.count {
          return Err(format!(
            "result {} does not match homomorphic tally {}",
            t.count, expected
          ));
        }
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::crypto::generate_signing_keypair;

  fn signed_register(name: &str) -> (RegisterTx, ed25519_dalek::Keypair) {
    let kp = generate_signing_keypair();
    let origin = Origin::new(name);
    let payload =
      bincode::serialize(&(&origin, 1u32, kp.public)).unwrap();
    let signature = crypto::sign(&kp, &payload);
    (
      RegisterTx {
        origin,
        id: 1,
        public_key: kp.public,
        signature,
      },
      kp,
    )
  }

  #[test]
  fn register_accepted_once() {
    let registry = Registry::new();
    let (tx, _kp) = signed_register("alice");
    let tx = Transaction::Register(tx);
    assert!(tx.validate(&registry).is_ok());
    registry.register(tx.origin().clone(), match &tx {
      Transaction::Register(r) => r.public_key,
      _ => unreachable!(),
    });
    assert!(tx.validate(&registry).is_err());
  }
}
