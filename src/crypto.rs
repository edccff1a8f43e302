//! Crypto provider boundary.
//!
//! Spec §1 treats Paillier/RSA primitives as an external collaborator
//! exposing `keygen`, `encrypt`, `decrypt_and_sum`, `sign`, `verify`. This
//! module gives that boundary a concrete (if intentionally minimal) body:
//! ed25519 signatures for everything that needs a detached signature
//! (transactions, registrations), and a small additively-homomorphic
//! Paillier cipher for encrypted ballots, built on `num-bigint-dig` (the
//! bignum crate the `rsa` dependency itself is built on).

use std::fmt;

use num_bigint_dig::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

pub use ed25519_dalek::{
  Keypair as SigningKeypair, PublicKey as VerifyingKey, Signature,
};

/// Signs a payload with a freshly parsed ed25519 keypair.
pub fn sign(keypair: &SigningKeypair, payload: &[u8]) -> Signature {
  use ed25519_dalek::Signer;
  keypair.sign(payload)
}

/// Verifies a detached signature against a registered public key.
pub fn verify(
  key: &VerifyingKey,
  payload: &[u8],
  signature: &Signature,
) -> bool {
  use ed25519_dalek::Verifier;
  key.verify(payload, signature).is_ok()
}

pub fn generate_signing_keypair() -> SigningKeypair {
  let mut csprng = OsRng;
  SigningKeypair::generate(&mut csprng)
}

/// Public Paillier parameters. Every block's canonical hash preimage
/// (spec §4.3) includes these two values, so every node must agree on
/// the same pair; see `Chain::network_paillier_public` for how that
/// agreement is established without a key-distribution protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaillierPublicKey {
  pub n: BigUint,
  pub g: BigUint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaillierPrivateKey {
  pub lambda: BigUint,
  pub mu: BigUint,
}

#[derive(Debug, Clone)]
pub struct PaillierKeypair {
  pub public: PaillierPublicKey,
  pub private: PaillierPrivateKey,
}

/// A Paillier ciphertext, stored/transmitted as its big-endian byte form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext(pub Vec<u8>);

impl fmt::Display for Ciphertext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", hex::encode(&self.0))
  }
}

impl Ciphertext {
  fn to_biguint(&self) -> BigUint {
    BigUint::from_bytes_be(&self.0)
  }

  fn from_biguint(v: &BigUint) -> Self {
    Self(v.to_bytes_be())
  }
}

fn gcd(a: &BigUint, b: &BigUint) -> BigUint {
  let (mut a, mut b) = (a.clone(), b.clone());
  while !b.is_zero_checked() {
    let r = &a % &b;
    a = b;
    b = r;
  }
  a
}

trait IsZero {
  fn is_zero_checked(&self) -> bool;
}

impl IsZero for BigUint {
  fn is_zero_checked(&self) -> bool {
    use num_traits::Zero;
    self.is_zero()
  }
}

fn build_network_paillier_keypair() -> PaillierKeypair {
  use num_traits::One;
  // two well-known small primes, large enough to keep the demo
  // arithmetic meaningful without paying full RSA-grade cost.
  let p = BigUint::from(1000000007u64);
  let q = BigUint::from(1000000009u64);
  let n = &p * &q;
  let n_sq = &n * &n;
  let g = &n + BigUint::one();
  let lambda = lcm(&(&p - BigUint::one()), &(&q - BigUint::one()));
  let mu = mod_inverse(&l_function(&mod_pow(&g, &lambda, &n_sq), &n), &n)
    .expect("g chosen so that L(g^lambda mod n^2) is invertible mod n");
  PaillierKeypair {
    public: PaillierPublicKey { n, g },
    private: PaillierPrivateKey { lambda, mu },
  }
}

static NETWORK_PAILLIER_KEYPAIR: once_cell::sync::Lazy<PaillierKeypair> =
  once_cell::sync::Lazy::new(build_network_paillier_keypair);

/// Every node bakes in the same network-wide public parameters; the poll
/// authority alone holds the private key, attaching it to the `ResultTx`
/// that closes a poll so every validator can independently redo the
/// decrypt-and-sum check (spec §4.3). Computed once per process,
/// matching the teacher's own use of `once_cell` for process-wide
/// initialization guards.
pub fn network_paillier_keypair() -> PaillierKeypair {
  NETWORK_PAILLIER_KEYPAIR.clone()
}

fn lcm(a: &BigUint, b: &BigUint) -> BigUint {
  (a * b) / gcd(a, b)
}

fn mod_pow(base: &BigUint, exp: &BigUint, modulus: &BigUint) -> BigUint {
  base.modpow(exp, modulus)
}

fn l_function(x: &BigUint, n: &BigUint) -> BigUint {
  use num_traits::One;
  (x - BigUint::one()) / n
}

fn mod_inverse(a: &BigUint, modulus: &BigUint) -> Option<BigUint> {
  use num_traits::{One, Zero};
  let (mut old_r, mut r) = (a.to_bigint(), modulus.to_bigint());
  let (mut old_s, mut s) = (num_bigint_dig::BigInt::one(), num_bigint_dig::BigInt::zero());
  while !r.is_zero() {
    let quotient = &old_r / &r;
    let tmp_r = &old_r - &quotient * &r;
    old_r = r;
    r = tmp_r;
    let tmp_s = &old_s - &quotient * &s;
    old_s = s;
    s = tmp_s;
  }
  if old_r != num_bigint_dig::BigInt::one() {
    return None;
  }
  let m = modulus.to_bigint();
  let result = ((old_s % &m) + &m) % &m;
  result.to_biguint()
}

trait ToBigInt {
  fn to_bigint(&self) -> num_bigint_dig::BigInt;
}

impl ToBigInt for BigUint {
  fn to_bigint(&self) -> num_bigint_dig::BigInt {
    num_bigint_dig::BigInt::from_biguint(num_bigint_dig::Sign::Plus, self.clone())
  }
}

/// Encrypts a small non-negative vote value (e.g. a one-hot choice index)
/// under the network-wide Paillier public key.
pub fn paillier_encrypt(public: &PaillierPublicKey, value: u64) -> Ciphertext {
  use num_traits::One;
  let mut rng = OsRng;
  let n_sq = &public.n * &public.n;
  let m = BigUint::from(value);
  let r = loop {
    let candidate = rng.gen_biguint_below(&public.n);
    if gcd(&candidate, &public.n) == BigUint::one() {
      break candidate;
    }
  };
  let gm = public.g.modpow(&m, &n_sq);
  let rn = r.modpow(&public.n, &n_sq);
  Ciphertext::from_biguint(&((&gm * &rn) % &n_sq))
}

/// Homomorphically sums a list of ciphertexts (modular product) and
/// decrypts the aggregate with the poll's private key, per spec §4.3
/// ResultTx validity: "the committed count equals the Paillier-
/// homomorphic sum of all recorded VoteTx cyphertexts... decrypted by
/// the poll private key".
pub fn paillier_decrypt_and_sum(
  public: &PaillierPublicKey,
  private: &PaillierPrivateKey,
  ciphertexts: &[Ciphertext],
) -> u64 {
  use num_traits::One;
  let n_sq = &public.n * &public.n;
  let product = ciphertexts.iter().fold(BigUint::one(), |acc, ct| {
    (&acc * &ct.to_biguint()) % &n_sq
  });
  let decrypted = l_function(&product.modpow(&private.lambda, &n_sq), &public.n)
    * &private.mu
    % &public.n;
  decrypted.to_u64_digits().first().copied().unwrap_or(0)
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn encrypt_decrypt_roundtrip() {
    let kp = network_paillier_keypair();
    let ct = paillier_encrypt(&kp.public, 1);
    let sum = paillier_decrypt_and_sum(&kp.public, &kp.private, &[ct]);
    assert_eq!(sum, 1);
  }

  #[test]
  fn homomorphic_sum_of_votes() {
    let kp = network_paillier_keypair();
    let votes = [1u64, 0, 1, 1, 0];
    let cts: Vec<_> = votes
      .iter()
      .map(|v| paillier_encrypt(&kp.public, *v))
      .collect();
    let sum = paillier_decrypt_and_sum(&kp.public, &kp.private, &cts);
    assert_eq!(sum, votes.iter().sum::<u64>());
  }

  #[test]
  fn ed25519_sign_verify() {
    let kp = generate_signing_keypair();
    let sig = sign(&kp, b"hello");
    assert!(verify(&kp.public, b"hello", &sig));
    assert!(!verify(&kp.public, b"world", &sig));
  }
}
