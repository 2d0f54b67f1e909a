use crate::Principal;
use jwt_simple::prelude::*;

const JWT_DURATION: u64 = 60 * 60 * 24 * 7;
const JWT_ISS: &str = "chat_server";
const JWT_AUD: &str = "chat_web";

/// Signs principals into Ed25519 JWTs. Owned by the upstream auth service; kept here for tooling and tests.
pub struct EncodingKey(Ed25519KeyPair);

/// Verifies Ed25519 JWTs and yields the [`Principal`] they carry.
pub struct DecodingKey(Ed25519PublicKey);

impl EncodingKey {
    pub fn load(pem: &str) -> Result<Self, jwt_simple::Error> {
        Ok(Self(Ed25519KeyPair::from_pem(pem)?))
    }

    pub fn sign(&self, principal: impl Into<Principal>) -> Result<String, jwt_simple::Error> {
        let claims = Claims::with_custom_claims(principal.into(), Duration::from_secs(JWT_DURATION))
            .with_issuer(JWT_ISS)
            .with_audience(JWT_AUD);
        self.0.sign(claims)
    }
}

impl DecodingKey {
    pub fn load(pem: &str) -> Result<Self, jwt_simple::Error> {
        Ok(Self(Ed25519PublicKey::from_pem(pem)?))
    }

    pub fn verify(&self, token: &str) -> Result<Principal, jwt_simple::Error> {
        let opts = VerificationOptions {
            allowed_issuers: Some(HashSet::from_strings(&[JWT_ISS])),
            allowed_audiences: Some(HashSet::from_strings(&[JWT_AUD])),
            ..Default::default()
        };
        let claims = self.0.verify_token::<Principal>(token, Some(opts))?;
        Ok(claims.custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn jwt_sign_verify_should_work() -> Result<()> {
        let ek = EncodingKey::load(include_str!("../../fixtures/encoding.pem"))?;
        let dk = DecodingKey::load(include_str!("../../fixtures/decoding.pem"))?;

        let principal = Principal::new("u1", "alice");
        let token = ek.sign(principal.clone())?;
        let verified = dk.verify(&token)?;

        assert_eq!(principal, verified);
        Ok(())
    }

    #[test]
    fn jwt_verify_should_reject_garbage() -> Result<()> {
        let dk = DecodingKey::load(include_str!("../../fixtures/decoding.pem"))?;
        assert!(dk.verify("not-a-token").is_err());
        Ok(())
    }
}
