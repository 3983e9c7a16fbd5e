//! Ephemeral SSH keys (Glossary: "a key created just to suppress the cloud
//! provider's password email; always deleted at batch end")

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

/// An ephemeral keypair's public half, in the `ssh-ed25519 <base64> k8zner-ephemeral` format.
pub struct EphemeralKey {
    pub public_key_openssh: String,
}

/// Generate a fresh ed25519 keypair. The private half is discarded immediately —
/// the cloud provider only ever sees the public key, and this operator
/// never needs to SSH in with it.
pub fn generate() -> EphemeralKey {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();

    let mut blob = Vec::new();
    write_ssh_string(&mut blob, b"ssh-ed25519");
    write_ssh_string(&mut blob, verifying_key.as_bytes());

    EphemeralKey {
        public_key_openssh: format!("ssh-ed25519 {} k8zner-ephemeral", STANDARD.encode(blob)),
    }
}

fn write_ssh_string(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_has_expected_prefix_and_comment() {
        let key = generate();
        assert!(key.public_key_openssh.starts_with("ssh-ed25519 "));
        assert!(key.public_key_openssh.ends_with("k8zner-ephemeral"));
    }

    #[test]
    fn two_generated_keys_differ() {
        assert_ne!(generate().public_key_openssh, generate().public_key_openssh);
    }
}
