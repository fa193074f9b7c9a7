use super::*;

// =============================================================
// Auth
// =============================================================

#[test]
fn credentials_debug_redacts_password() {
    let rendered = format!("{:?}", Credentials::new("alice", "hunter2"));
    assert!(rendered.contains("alice"));
    assert!(!rendered.contains("hunter2"));
}

#[test]
fn login_response_decodes_full_body() {
    let resp: LoginResponse =
        serde_json::from_str(r#"{"access_token":"tok","username":"alice","is_admin":true}"#).unwrap();
    assert_eq!(resp.access_token, "tok");
    assert_eq!(resp.username, "alice");
    assert!(resp.is_admin);
}

#[test]
fn login_response_missing_fields_default() {
    let resp: LoginResponse = serde_json::from_str(r#"{"msg":"ok"}"#).unwrap();
    assert!(resp.access_token.is_empty());
    assert!(!resp.is_admin);
}

#[test]
fn login_response_debug_redacts_token() {
    let resp: LoginResponse = serde_json::from_str(r#"{"access_token":"secret-tok","username":"alice"}"#).unwrap();
    assert!(!format!("{resp:?}").contains("secret-tok"));
}

#[test]
fn error_body_message_is_optional() {
    let body: ErrorBody = serde_json::from_str("{}").unwrap();
    assert_eq!(body.message, None);
    let body: ErrorBody = serde_json::from_str(r#"{"message":"bad credentials"}"#).unwrap();
    assert_eq!(body.message.as_deref(), Some("bad credentials"));
}

// =============================================================
// Trips and locations
// =============================================================

#[test]
fn trip_decodes_with_missing_optionals() {
    let trip: Trip = serde_json::from_str(r#"{"id":3,"date":"2024-05-01"}"#).unwrap();
    assert_eq!(trip.id, 3);
    assert_eq!(trip.date.as_deref(), Some("2024-05-01"));
    assert_eq!(trip.distance_km, None);
}

#[test]
fn new_trip_skips_unset_optionals() {
    let trip = NewTrip {
        date: "2024-05-01".to_owned(),
        start_location_id: 1,
        end_location_id: 2,
        distance_km: None,
        purpose: Some("client visit".to_owned()),
    };
    let value = serde_json::to_value(&trip).unwrap();
    assert_eq!(
        value,
        serde_json::json!({
            "date": "2024-05-01",
            "start_location_id": 1,
            "end_location_id": 2,
            "purpose": "client visit"
        })
    );
}

#[test]
fn location_input_partial_update_sends_only_set_fields() {
    let input = LocationInput { address: Some("Vestergade 1".to_owned()), ..LocationInput::default() };
    assert_eq!(serde_json::to_value(&input).unwrap(), serde_json::json!({ "address": "Vestergade 1" }));
}

// =============================================================
// Admin users
// =============================================================

#[test]
fn user_admin_flag_defaults_false() {
    let user: User = serde_json::from_str(r#"{"id":1,"username":"bob"}"#).unwrap();
    assert!(!user.is_admin);
}

#[test]
fn user_update_debug_redacts_password() {
    let update = UserUpdate { password: Some("hunter2".to_owned()), ..UserUpdate::default() };
    assert!(!format!("{update:?}").contains("hunter2"));
}

#[test]
fn new_user_serializes_admin_flag_as_boolean() {
    let user = NewUser { username: "carol".to_owned(), password: "pw".to_owned(), is_admin: false };
    let value = serde_json::to_value(&user).unwrap();
    assert_eq!(value["is_admin"], serde_json::Value::Bool(false));
}
