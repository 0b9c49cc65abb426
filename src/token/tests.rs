use super::*;

fn encode(json: &str) -> String {
    URL_SAFE_NO_PAD.encode(json)
}

fn sample_jwt(exp: i64) -> String {
    format!(
        "{}.{}.signature",
        encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        encode(&format!(r#"{{"sub":"user-1","exp":{}}}"#, exp))
    )
}

fn sample_session_token() -> String {
    format!(
        "{}..iv-part.cipher-part.tag-part",
        encode(r#"{"alg":"dir","enc":"A256CBC-HS512","kid":"k1"}"#)
    )
}

const FULL_COOKIE: &str = "__Host-authjs.csrf-token=AAA; __Secure-authjs.callback-url=BBB; __Secure-authjs.session-token=CCC";

#[cfg(test)]
mod detect_token_type_tests {
    use super::*;

    #[test]
    fn three_segment_token_is_jwt() {
        assert_eq!(detect_token_type(&sample_jwt(1_900_000_000)), DetectedType::Jwt);
        assert_eq!(detect_token_type("eyJa.b.c"), DetectedType::Jwt);
        assert_eq!(detect_token_type("  eyJa.b.c  "), DetectedType::Jwt);
    }

    #[test]
    fn jwe_with_authjs_encryption_is_session() {
        assert_eq!(
            detect_token_type(&sample_session_token()),
            DetectedType::Session
        );
    }

    #[test]
    fn jwe_with_other_encryption_is_unknown() {
        let token = format!(
            "{}..iv.cipher.tag",
            encode(r#"{"alg":"dir","enc":"A128GCM"}"#)
        );
        assert_eq!(detect_token_type(&token), DetectedType::Unknown);
    }

    #[test]
    fn cookie_header_is_full_cookie() {
        assert_eq!(detect_token_type(FULL_COOKIE), DetectedType::FullCookie);
    }

    #[test]
    fn anything_else_is_unknown() {
        assert_eq!(detect_token_type(""), DetectedType::Unknown);
        assert_eq!(detect_token_type("plain-opaque-token"), DetectedType::Unknown);
        assert_eq!(detect_token_type("abc.def.ghi"), DetectedType::Unknown);
        assert_eq!(detect_token_type("eyJonly-one-segment"), DetectedType::Unknown);
    }
}

#[cfg(test)]
mod parse_cookie_string_tests {
    use super::*;

    #[test]
    fn parses_three_authjs_fields() {
        let parsed = parse_cookie_string(FULL_COOKIE).unwrap();

        assert_eq!(parsed.kind, DetectedType::FullCookie);
        assert_eq!(parsed.csrf_token.as_deref(), Some("AAA"));
        assert_eq!(parsed.callback_url.as_deref(), Some("BBB"));
        assert_eq!(parsed.session_token.as_deref(), Some("CCC"));
        assert!(parsed.extra.is_empty());
        assert!(parsed.cookie_string.is_none());
        assert!(parsed.has_cookie_components());
    }

    #[test]
    fn tolerates_irregular_spacing_and_padding_in_values() {
        let raw = "  __Secure-authjs.session-token = abc==;__Host-authjs.csrf-token=x%7Cy ; ";
        let parsed = parse_cookie_string(raw).unwrap();

        assert_eq!(parsed.session_token.as_deref(), Some("abc=="));
        assert_eq!(parsed.csrf_token.as_deref(), Some("x%7Cy"));
        assert!(parsed.callback_url.is_none());
    }

    #[test]
    fn keeps_foreign_cookies_and_prebuilds_header() {
        let raw = "_ga=GA1.2; __Secure-authjs.session-token=CCC; theme=dark";
        let parsed = parse_cookie_string(raw).unwrap();

        assert_eq!(
            parsed.extra,
            vec![
                ("_ga".to_string(), "GA1.2".to_string()),
                ("theme".to_string(), "dark".to_string()),
            ]
        );
        assert_eq!(
            parsed.cookie_string.as_deref(),
            Some("_ga=GA1.2; __Secure-authjs.session-token=CCC; theme=dark")
        );
    }

    #[test]
    fn bare_token_short_circuits() {
        let token = sample_session_token();
        let parsed = parse_cookie_string(&token).unwrap();

        assert_eq!(parsed.kind, DetectedType::Session);
        assert_eq!(parsed.session_token, Some(token));
        assert!(!parsed.has_cookie_components());
    }

    #[test]
    fn missing_session_field_fails() {
        assert_eq!(
            parse_cookie_string("__Host-authjs.csrf-token=AAA; other=1"),
            Err(CodecError::MissingSessionToken)
        );
        assert_eq!(
            parse_cookie_string("__Secure-authjs.session-token="),
            Err(CodecError::MissingSessionToken)
        );
        assert_eq!(
            parse_cookie_string("not a cookie at all"),
            Err(CodecError::MissingSessionToken)
        );
    }

    #[test]
    fn empty_input_fails() {
        assert_eq!(parse_cookie_string(""), Err(CodecError::Empty));
        assert_eq!(parse_cookie_string("   "), Err(CodecError::Empty));
    }
}

#[cfg(test)]
mod extract_session_token_tests {
    use super::*;

    #[test]
    fn from_cookie_header() {
        assert_eq!(
            extract_session_token_from_cookie(FULL_COOKIE).unwrap(),
            "CCC"
        );
    }

    #[test]
    fn from_bare_token() {
        let token = sample_session_token();
        assert_eq!(extract_session_token_from_cookie(&token).unwrap(), token);
    }

    #[test]
    fn from_garbage() {
        assert!(extract_session_token_from_cookie("a=b").is_err());
    }
}

#[cfg(test)]
mod build_full_cookie_string_tests {
    use super::*;

    #[test]
    fn round_trips_session_token() {
        let defaults = CookieDefaults::default();
        let parsed = parse_cookie_string(FULL_COOKIE).unwrap();
        let rebuilt = build_full_cookie_string(&parsed, &defaults);

        assert_eq!(rebuilt, FULL_COOKIE);
        assert_eq!(extract_session_token_from_cookie(&rebuilt).unwrap(), "CCC");
    }

    #[test]
    fn fills_missing_fields_with_defaults() {
        let defaults = CookieDefaults {
            csrf_token: "fallback-csrf".to_string(),
            callback_url: "https://fallback/".to_string(),
        };
        let rebuilt = build_full_cookie_string("__Secure-authjs.session-token=CCC", &defaults);

        assert_eq!(
            rebuilt,
            "__Host-authjs.csrf-token=fallback-csrf; __Secure-authjs.callback-url=https://fallback/; __Secure-authjs.session-token=CCC"
        );
    }

    #[test]
    fn prebuilt_header_is_returned_verbatim() {
        let raw = "_ga=1; __Secure-authjs.session-token=CCC";
        let parsed = parse_cookie_string(raw).unwrap();

        assert_eq!(
            build_full_cookie_string(&parsed, &CookieDefaults::default()),
            raw
        );
    }

    #[test]
    fn unparseable_raw_is_used_as_session_value() {
        let rebuilt = build_full_cookie_string("opaque-session", &CookieDefaults::default());

        assert!(rebuilt.ends_with("__Secure-authjs.session-token=opaque-session"));
        assert!(rebuilt.starts_with("__Host-authjs.csrf-token=kimvan-csrf"));
    }
}

#[cfg(test)]
mod decode_jwt_expiry_tests {
    use super::*;

    #[test]
    fn reads_exp_claim() {
        let expiry = decode_jwt_expiry(&sample_jwt(1_900_000_000)).unwrap();
        assert_eq!(expiry.timestamp(), 1_900_000_000);
    }

    #[test]
    fn none_for_non_jwt_or_missing_claim() {
        assert!(decode_jwt_expiry(&sample_session_token()).is_none());

        let no_exp = format!("{}.{}.sig", encode(r#"{"alg":"HS256"}"#), encode(r#"{"sub":"x"}"#));
        assert!(decode_jwt_expiry(&no_exp).is_none());

        assert!(decode_jwt_expiry("eyJ!!!.@@@.sig").is_none());
    }
}
