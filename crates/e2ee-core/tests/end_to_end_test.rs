mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{signed_claim, MockClaimClient, MockCryptoEngine, ALICE, BOB};
use e2ee_core::{
    Device, DeviceStore, InMemoryDeviceStore, MessageEncrypter, Result, SessionEstablisher,
    UserDeviceMap,
};
use serde_json::{json, Map, Value};

// Claim a key, establish the session, then encrypt through it. Exercises the
// path a room key share takes before the transport picks it up.
#[tokio::test]
async fn test_establish_then_encrypt() -> Result<()> {
    let engine = Arc::new(MockCryptoEngine::with_own_keys());
    let store = Arc::new(InMemoryDeviceStore::new());

    let device = Device::new(
        BOB,
        "BOBDEV",
        Some("bob-curve".to_string()),
        Some("bob-ed".to_string()),
    );
    store.store_device(device.clone())?;

    let mut claims = UserDeviceMap::new();
    claims.set(BOB, "BOBDEV", signed_claim("bob-otk", &device));
    let client = Arc::new(MockClaimClient::new(claims));

    let establisher = SessionEstablisher::new(engine.clone(), client, store);
    let results = establisher
        .ensure_sessions_for_users(&[BOB.to_string()])
        .await?;
    let session_id = results
        .get(BOB, "BOBDEV")
        .and_then(|result| result.session_id.clone())
        .unwrap();

    let mut payload = Map::new();
    payload.insert("type".to_string(), json!("m.room_key"));
    payload.insert(
        "content".to_string(),
        json!({ "room_id": "!room:example.org", "session_key": "sk" }),
    );

    let encrypter = MessageEncrypter::new(engine, ALICE, "ALICEDEV");
    let message = encrypter.encrypt_message(&payload, &[device])?;

    assert_eq!(message.cipher_text.len(), 1);
    let ciphertext = &message.cipher_text["bob-curve"];
    let (used_session, plaintext) = ciphertext.split_once('|').unwrap();
    assert_eq!(used_session, session_id);

    let decoded: Value = serde_json::from_str(plaintext).unwrap();
    assert_eq!(decoded["sender"], ALICE);
    assert_eq!(decoded["recipient"], BOB);
    assert_eq!(decoded["recipient_keys"]["ed25519"], "bob-ed");
    assert_eq!(decoded["content"]["room_id"], "!room:example.org");
    Ok(())
}

#[tokio::test]
async fn test_reencrypt_after_forced_reestablish_uses_new_session() -> Result<()> {
    let engine = Arc::new(MockCryptoEngine::with_own_keys());
    let store = Arc::new(InMemoryDeviceStore::new());

    let device = Device::new(
        BOB,
        "BOBDEV",
        Some("bob-curve".to_string()),
        Some("bob-ed".to_string()),
    );
    store.store_device(device.clone())?;

    let mut claims = UserDeviceMap::new();
    claims.set(BOB, "BOBDEV", signed_claim("bob-otk", &device));
    let client = Arc::new(MockClaimClient::new(claims));
    let establisher = SessionEstablisher::new(engine.clone(), client, store);

    let mut by_user = HashMap::new();
    by_user.insert(BOB.to_string(), vec![device.clone()]);

    let first = establisher.ensure_sessions_for_devices(&by_user, false).await?;
    let first_session = first.get(BOB, "BOBDEV").unwrap().session_id.clone().unwrap();

    let second = establisher.ensure_sessions_for_devices(&by_user, true).await?;
    let second_session = second.get(BOB, "BOBDEV").unwrap().session_id.clone().unwrap();
    assert_ne!(first_session, second_session);

    let encrypter = MessageEncrypter::new(engine, ALICE, "ALICEDEV");
    let message = encrypter.encrypt_message(&Map::new(), &[device])?;
    let (used_session, _) = message.cipher_text["bob-curve"].split_once('|').unwrap();
    assert_eq!(used_session, second_session);
    Ok(())
}
