// Copyright 2026 the Cube authors. MIT license.
//
// `$native("crypto")` (§4.G). Grounded in `internal/module/crypto.go`:
// `createHash(algorithm)` / `createHmac(algorithm)` returning a `.sum`
// client, and `createRsa()` returning key-generation/encrypt/decrypt/
// sign/verify bound to PKCS#1 PEM, the same wire format the Go source
// produces via `x509.MarshalPKCS1PrivateKey`. `md5`/`sha1` are in the Go
// source's algorithm table but are deliberately not carried forward here
// — both are already broken for any use this native would be put to,
// and the workspace does not otherwise depend on a crate for them.

use std::cell::RefCell;
use std::rc::Rc;

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use aes::Aes128;
use hmac::{Hmac, Mac};
use rsa::oaep::Oaep;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pss::{SigningKey as PssSigningKey, VerifyingKey as PssVerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256, Sha512};

use crate::support::{arg_bytes, arg_string, make_bytes, set_method, throw, throw_on_err};

/// ECB-mode AES-128 with PKCS#7 padding (§4.G crypto: "symmetric cipher
/// (ECB + padding)"), grounded in `internal/module/crypto.go`'s
/// `Cipher.Encrypt`/`Decrypt` (Go `crypto/aes` + hand-rolled ECB loop,
/// since Go's stdlib has no `cipher.BlockMode` for ECB either). The `aes`
/// crate exposes only the raw block primitive; we drive it one 16-byte
/// block at a time exactly as the original does.
type Ecb<M> = ecb_shim::Ecb<M>;
mod ecb_shim {
    use super::*;
    pub struct Ecb<M>(std::marker::PhantomData<M>);
    impl Ecb<Aes128> {
        pub fn encrypt(key: &[u8], plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
            let cipher = Aes128::new_from_slice(key).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            let padded = pkcs7_pad(plaintext, 16);
            let mut out = padded;
            for block in out.chunks_mut(16) {
                let mut b = aes::cipher::generic_array::GenericArray::clone_from_slice(block);
                cipher.encrypt_block(&mut b);
                block.copy_from_slice(&b);
            }
            Ok(out)
        }

        pub fn decrypt(key: &[u8], ciphertext: &[u8]) -> anyhow::Result<Vec<u8>> {
            if ciphertext.len() % 16 != 0 || ciphertext.is_empty() {
                anyhow::bail!("ciphertext is not a multiple of the AES block size");
            }
            let cipher = Aes128::new_from_slice(key).map_err(|e| anyhow::anyhow!(e.to_string()))?;
            let mut out = ciphertext.to_vec();
            for block in out.chunks_mut(16) {
                let mut b = aes::cipher::generic_array::GenericArray::clone_from_slice(block);
                cipher.decrypt_block(&mut b);
                block.copy_from_slice(&b);
            }
            pkcs7_unpad(&out)
        }
    }

    fn pkcs7_pad(input: &[u8], block_size: usize) -> Vec<u8> {
        let pad_len = block_size - (input.len() % block_size);
        let mut out = input.to_vec();
        out.extend(std::iter::repeat(pad_len as u8).take(pad_len));
        out
    }

    fn pkcs7_unpad(input: &[u8]) -> anyhow::Result<Vec<u8>> {
        let pad_len = *input.last().ok_or_else(|| anyhow::anyhow!("empty ciphertext"))? as usize;
        if pad_len == 0 || pad_len > input.len() {
            anyhow::bail!("invalid PKCS#7 padding");
        }
        Ok(input[..input.len() - pad_len].to_vec())
    }
}

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<cube_core::vm::WorkerState>>) -> v8::Local<'s, v8::Value> {
    let obj = v8::Object::new(scope);
    set_method(scope, obj, "createHash", create_hash);
    set_method(scope, obj, "createHmac", create_hmac);
    set_method(scope, obj, "createRsa", create_rsa);
    set_method(scope, obj, "createCipher", create_cipher);
    obj.into()
}

fn create_cipher(scope: &mut v8::HandleScope, _args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let obj = v8::Object::new(scope);
    set_method(scope, obj, "encrypt", cipher_encrypt);
    set_method(scope, obj, "decrypt", cipher_decrypt);
    rv.set(obj.into());
}

fn cipher_encrypt(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let (Some(input), Some(key)) = (arg_bytes(scope, &args, 0), arg_bytes(scope, &args, 1)) else {
        throw(scope, "cipher.encrypt(input, key): both arguments must be a string or Uint8Array");
        return;
    };
    let Some(out) = throw_on_err(scope, Ecb::<Aes128>::encrypt(&key, &input)) else {
        return;
    };
    rv.set(make_bytes(scope, &out));
}

fn cipher_decrypt(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let (Some(input), Some(key)) = (arg_bytes(scope, &args, 0), arg_bytes(scope, &args, 1)) else {
        throw(scope, "cipher.decrypt(input, key): both arguments must be a string or Uint8Array");
        return;
    };
    let Some(out) = throw_on_err(scope, Ecb::<Aes128>::decrypt(&key, &input)) else {
        return;
    };
    rv.set(make_bytes(scope, &out));
}

fn create_hash(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(algorithm) = arg_string(scope, &args, 0) else {
        throw(scope, "crypto.createHash(algorithm): algorithm must be a string");
        return;
    };
    if !matches!(algorithm.to_lowercase().as_str(), "sha256" | "sha512") {
        throw(scope, &format!("hash algorithm {algorithm} is not supported"));
        return;
    }
    let obj = v8::Object::new(scope);
    let key = v8::String::new(scope, "__algorithm").unwrap();
    let value = v8::String::new(scope, &algorithm.to_lowercase()).unwrap();
    obj.set(scope, key.into(), value.into());
    set_method(scope, obj, "sum", hash_sum);
    rv.set(obj.into());
}

fn hash_sum(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(algorithm) = this_string(scope, args.this(), "__algorithm") else {
        return;
    };
    let Some(input) = arg_bytes(scope, &args, 0) else {
        throw(scope, "hash.sum(input): input must be a string or Uint8Array");
        return;
    };
    let digest = digest_for(&algorithm, &input);
    rv.set(make_bytes(scope, &digest));
}

fn create_hmac(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(algorithm) = arg_string(scope, &args, 0) else {
        throw(scope, "crypto.createHmac(algorithm): algorithm must be a string");
        return;
    };
    if !matches!(algorithm.to_lowercase().as_str(), "sha256" | "sha512") {
        throw(scope, &format!("hmac algorithm {algorithm} is not supported"));
        return;
    }
    let obj = v8::Object::new(scope);
    let key = v8::String::new(scope, "__algorithm").unwrap();
    let value = v8::String::new(scope, &algorithm.to_lowercase()).unwrap();
    obj.set(scope, key.into(), value.into());
    set_method(scope, obj, "sum", hmac_sum);
    rv.set(obj.into());
}

fn hmac_sum(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(algorithm) = this_string(scope, args.this(), "__algorithm") else {
        return;
    };
    let (Some(input), Some(key)) = (arg_bytes(scope, &args, 0), arg_bytes(scope, &args, 1)) else {
        throw(scope, "hmac.sum(input, key): both arguments must be a string or Uint8Array");
        return;
    };
    let digest = match algorithm.as_str() {
        "sha512" => {
            let Some(mut mac) = throw_on_err(scope, Hmac::<Sha512>::new_from_slice(&key)) else {
                return;
            };
            mac.update(&input);
            mac.finalize().into_bytes().to_vec()
        }
        _ => {
            let Some(mut mac) = throw_on_err(scope, Hmac::<Sha256>::new_from_slice(&key)) else {
                return;
            };
            mac.update(&input);
            mac.finalize().into_bytes().to_vec()
        }
    };
    rv.set(make_bytes(scope, &digest));
}

fn digest_for(algorithm: &str, input: &[u8]) -> Vec<u8> {
    match algorithm {
        "sha512" => Sha512::digest(input).to_vec(),
        _ => Sha256::digest(input).to_vec(),
    }
}

fn this_string(scope: &mut v8::HandleScope, this: v8::Local<v8::Value>, field: &str) -> Option<String> {
    let object: v8::Local<v8::Object> = this.try_into().ok()?;
    let key = v8::String::new(scope, field).unwrap();
    let value = object.get(scope, key.into())?;
    Some(value.to_rust_string_lossy(scope))
}

fn create_rsa(scope: &mut v8::HandleScope, _args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let obj = v8::Object::new(scope);
    set_method(scope, obj, "generateKey", rsa_generate_key);
    set_method(scope, obj, "encrypt", rsa_encrypt);
    set_method(scope, obj, "decrypt", rsa_decrypt);
    set_method(scope, obj, "sign", rsa_sign);
    set_method(scope, obj, "verify", rsa_verify);
    rv.set(obj.into());
}

fn rsa_generate_key(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let bits = args.get(0).int32_value(scope).filter(|b| *b > 0).unwrap_or(2048) as usize;
    let mut rng = rand::thread_rng();
    let Some(private_key) = throw_on_err(scope, RsaPrivateKey::new(&mut rng, bits)) else {
        return;
    };
    let public_key = RsaPublicKey::from(&private_key);
    let Some(private_pem) = throw_on_err(
        scope,
        private_key.to_pkcs1_pem(rsa::pkcs8::LineEnding::LF),
    ) else {
        return;
    };
    let Some(public_pem) = throw_on_err(scope, public_key.to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)) else {
        return;
    };
    let obj = v8::Object::new(scope);
    let priv_key = v8::String::new(scope, "privateKey").unwrap();
    let pub_key = v8::String::new(scope, "publicKey").unwrap();
    let priv_value = v8::String::new(scope, &private_pem).unwrap();
    let pub_value = v8::String::new(scope, &public_pem).unwrap();
    obj.set(scope, priv_key.into(), priv_value.into());
    obj.set(scope, pub_key.into(), pub_value.into());
    rv.set(obj.into());
}

/// `scheme` is read as the optional 3rd/4th argument and defaults to
/// `"pkcs1"`; `"oaep"` (encrypt/decrypt) and `"pss"` (sign/verify) select
/// the other two paddings §4.G names for this native.
fn scheme_arg(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments, index: i32) -> String {
    arg_string(scope, args, index).unwrap_or_else(|| "pkcs1".to_string())
}

fn rsa_encrypt(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let (Some(input), Some(pem)) = (arg_bytes(scope, &args, 0), arg_string(scope, &args, 1)) else {
        throw(scope, "rsa.encrypt(input, publicKeyPem, scheme?): invalid arguments");
        return;
    };
    let Some(public_key) = throw_on_err(scope, RsaPublicKey::from_pkcs1_pem(&pem)) else {
        return;
    };
    let mut rng = rand::thread_rng();
    let result = match scheme_arg(scope, &args, 2).as_str() {
        "oaep" => public_key.encrypt(&mut rng, Oaep::new::<Sha256>(), &input),
        _ => public_key.encrypt(&mut rng, rsa::Pkcs1v15Encrypt, &input),
    };
    let Some(ciphertext) = throw_on_err(scope, result) else {
        return;
    };
    rv.set(make_bytes(scope, &ciphertext));
}

fn rsa_decrypt(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let (Some(input), Some(pem)) = (arg_bytes(scope, &args, 0), arg_string(scope, &args, 1)) else {
        throw(scope, "rsa.decrypt(input, privateKeyPem, scheme?): invalid arguments");
        return;
    };
    let Some(private_key) = throw_on_err(scope, RsaPrivateKey::from_pkcs1_pem(&pem)) else {
        return;
    };
    let result = match scheme_arg(scope, &args, 2).as_str() {
        "oaep" => private_key.decrypt(Oaep::new::<Sha256>(), &input),
        _ => private_key.decrypt(rsa::Pkcs1v15Encrypt, &input),
    };
    let Some(plaintext) = throw_on_err(scope, result) else {
        return;
    };
    rv.set(make_bytes(scope, &plaintext));
}

fn rsa_sign(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let (Some(input), Some(pem)) = (arg_bytes(scope, &args, 0), arg_string(scope, &args, 1)) else {
        throw(scope, "rsa.sign(input, privateKeyPem, scheme?): invalid arguments");
        return;
    };
    let Some(private_key) = throw_on_err(scope, RsaPrivateKey::from_pkcs1_pem(&pem)) else {
        return;
    };
    let bytes = if scheme_arg(scope, &args, 2) == "pss" {
        let signing_key = PssSigningKey::<Sha256>::new(private_key);
        let mut rng = rand::thread_rng();
        signing_key.sign_with_rng(&mut rng, &input).to_bytes().to_vec()
    } else {
        let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(private_key);
        signing_key.sign(&input).to_bytes().to_vec()
    };
    rv.set(make_bytes(scope, &bytes));
}

fn rsa_verify(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let (Some(input), Some(signature), Some(pem)) = (
        arg_bytes(scope, &args, 0),
        arg_bytes(scope, &args, 1),
        arg_string(scope, &args, 2),
    ) else {
        throw(scope, "rsa.verify(input, signature, publicKeyPem, scheme?): invalid arguments");
        return;
    };
    let Some(public_key) = throw_on_err(scope, RsaPublicKey::from_pkcs1_pem(&pem)) else {
        return;
    };
    let valid = if scheme_arg(scope, &args, 3) == "pss" {
        let verifying_key = PssVerifyingKey::<Sha256>::new(public_key);
        match rsa::pss::Signature::try_from(signature.as_slice()) {
            Ok(signature) => verifying_key.verify(&input, &signature).is_ok(),
            Err(_) => false,
        }
    } else {
        let verifying_key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public_key);
        match rsa::pkcs1v15::Signature::try_from(signature.as_slice()) {
            Ok(signature) => verifying_key.verify(&input, &signature).is_ok(),
            Err(_) => false,
        }
    };
    rv.set(v8::Boolean::new(scope, valid).into());
}
