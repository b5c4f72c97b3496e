//! Hello/HMAC authentication exchanged as the first packet on a new connection.

use hmac::{Hmac, Mac};
use rand::RngCore;
use ringcast_core::{Member, MemberId};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use ringcast_core::wire::HelloBody;

use crate::config::AuthenticationConfig;
use crate::error::NodeError;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 16;

/// Builds the `HELLO` body this node sends as the first packet on a dial.
///
/// When `auth.use_verification` is false, the nonce is still generated (so
/// the wire format is uniform) but the mac is empty.
pub fn build_hello(self_id: MemberId, auth: &AuthenticationConfig) -> HelloBody {
    let mut nonce = vec![0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let mac = if auth.use_verification {
        mac_for(&auth.key, &nonce)
    } else {
        Vec::new()
    };

    HelloBody { sender_id: self_id, nonce, mac }
}

/// Verifies an inbound `HELLO` against the claimed sender's key chain.
///
/// Tries every key in the chain (current first) so a peer mid key-rotation
/// is still accepted as long as it used either the old or new key.
pub fn verify_hello(
    hello: &HelloBody,
    sender: Option<&Member>,
    auth: &AuthenticationConfig,
) -> Result<(), NodeError> {
    if !auth.use_verification {
        return Ok(());
    }

    let Some(member) = sender else {
        return Err(NodeError::AuthRejected { peer: hello.sender_id });
    };

    if !member.auth_by_key {
        return Ok(());
    }

    let accepted = member
        .key_chain
        .iter()
        .any(|key| mac_for(key, &hello.nonce).ct_eq(&hello.mac).into());

    if accepted {
        Ok(())
    } else {
        Err(NodeError::AuthRejected { peer: hello.sender_id })
    }
}

fn mac_for(key: &str, nonce: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(nonce);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringcast_core::MemberState;

    fn member_with_keys(keys: Vec<&str>) -> Member {
        Member::new(
            1,
            MemberState::Valid,
            true,
            keys.into_iter().map(String::from).collect(),
            vec![],
            0,
        )
    }

    #[test]
    fn disabled_verification_always_passes() {
        let auth = AuthenticationConfig { use_verification: false, key: String::new() };
        let hello = build_hello(1, &auth);
        assert!(verify_hello(&hello, None, &auth).is_ok());
    }

    #[test]
    fn matching_current_key_passes() {
        let auth = AuthenticationConfig { use_verification: true, key: "secret".into() };
        let hello = build_hello(1, &auth);
        let member = member_with_keys(vec!["secret"]);
        assert!(verify_hello(&hello, Some(&member), &auth).is_ok());
    }

    #[test]
    fn rotated_but_retained_old_key_still_passes() {
        let auth = AuthenticationConfig { use_verification: true, key: "old-key".into() };
        let hello = build_hello(1, &auth);
        let member = member_with_keys(vec!["new-key", "old-key"]);
        assert!(verify_hello(&hello, Some(&member), &auth).is_ok());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let auth = AuthenticationConfig { use_verification: true, key: "wrong".into() };
        let hello = build_hello(1, &auth);
        let member = member_with_keys(vec!["secret"]);
        assert!(matches!(
            verify_hello(&hello, Some(&member), &auth),
            Err(NodeError::AuthRejected { peer: 1 })
        ));
    }

    #[test]
    fn unknown_sender_is_rejected() {
        let auth = AuthenticationConfig { use_verification: true, key: "secret".into() };
        let hello = build_hello(1, &auth);
        assert!(verify_hello(&hello, None, &auth).is_err());
    }
}
