use webhook_relay::{sign, signature_header_value, verify_webhook_request, SIGNATURE_HEADER};

fn main() {
    let payload = br#"{"webhook_id":"6f1c","event":"test","timestamp":"2024-01-01T00:00:00Z","data":{"test":true}}"#;
    let secret = "supersecret";

    // What the relay would have sent.
    let header_value = signature_header_value(&sign(payload, secret));
    let headers = vec![
        ("Content-Type", "application/json"),
        (SIGNATURE_HEADER, header_value.as_str()),
    ];

    match verify_webhook_request(headers.iter().map(|(k, v)| (*k, *v)), payload, secret, SIGNATURE_HEADER) {
        Ok(()) => println!("signature valid"),
        Err(err) => println!("rejected: {:?}", err),
    }

    let tampered = br#"{"webhook_id":"6f1c","event":"test","timestamp":"2024-01-01T00:00:00Z","data":{"test":false}}"#;
    let verdict = verify_webhook_request(headers.iter().map(|(k, v)| (*k, *v)), tampered, secret, SIGNATURE_HEADER);
    println!("tampered payload: {:?}", verdict);
}
