use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, CHACHA20_POLY1305, NONCE_LEN};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

// Envelope: base64( nonce(12) || ciphertext || tag(16) ).

pub(crate) fn derive_key(auth_key: &str) -> [u8; 32] {
    let digest = Sha256::digest(auth_key.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&digest);
    key
}

pub(crate) fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<String> {
    let unbound = UnboundKey::new(&CHACHA20_POLY1305, key).map_err(|_| Error::ErrCrypto)?;
    let sealing = LessSafeKey::new(unbound);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    sealing
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| Error::ErrCrypto)?;

    let mut framed = Vec::with_capacity(NONCE_LEN + in_out.len());
    framed.extend_from_slice(&nonce_bytes);
    framed.extend_from_slice(&in_out);
    Ok(BASE64_STANDARD.encode(framed))
}

pub(crate) fn open(key: &[u8; 32], sealed: &str) -> Result<Vec<u8>> {
    let raw = BASE64_STANDARD
        .decode(sealed)
        .map_err(|_| Error::ErrMalformedBlob)?;
    if raw.len() < NONCE_LEN + CHACHA20_POLY1305.tag_len() {
        return Err(Error::ErrMalformedBlob);
    }
    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);

    let unbound = UnboundKey::new(&CHACHA20_POLY1305, key).map_err(|_| Error::ErrCrypto)?;
    let opening = LessSafeKey::new(unbound);
    let nonce =
        Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| Error::ErrMalformedBlob)?;

    let mut buf = ciphertext.to_vec();
    let plaintext = opening
        .open_in_place(nonce, Aad::empty(), &mut buf)
        .map_err(|_| Error::ErrCrypto)?;
    Ok(plaintext.to_vec())
}
