use core::ffi::{c_int, c_long, CStr};

use rustls::AlertDescription;

// `SSL_get_error` results (ssl.h).
pub const SSL_ERROR_NONE: c_int = 0;
pub const SSL_ERROR_SSL: c_int = 1;
pub const SSL_ERROR_WANT_READ: c_int = 2;
pub const SSL_ERROR_WANT_WRITE: c_int = 3;
pub const SSL_ERROR_SYSCALL: c_int = 5;
pub const SSL_ERROR_ZERO_RETURN: c_int = 6;

// `SSL_want` results.
pub const SSL_NOTHING: c_int = 1;
pub const SSL_WRITING: c_int = 2;
pub const SSL_READING: c_int = 3;

pub const SSL_FILETYPE_PEM: c_int = 1;
pub const SSL_FILETYPE_ASN1: c_int = 2;

pub const TLSEXT_NAMETYPE_HOST_NAME: c_long = 0;

pub const SSL_ST_OK: c_int = 3;

pub const X509_V_OK: c_int = 0;
pub const X509_V_ERR_UNSPECIFIED: c_int = 1;
pub const X509_V_ERR_CERT_SIGNATURE_FAILURE: c_int = 7;
pub const X509_V_ERR_UNABLE_TO_GET_ISSUER_CERT_LOCALLY: c_int = 20;
pub const X509_V_ERR_CERT_CHAIN_TOO_LONG: c_int = 22;
pub const X509_V_ERR_INVALID_CA: c_int = 24;
pub const X509_V_ERR_HOSTNAME_MISMATCH: c_int = 62;

pub const ALERT_LEVEL_WARNING: u8 = 1;
pub const ALERT_LEVEL_FATAL: u8 = 2;

pub fn alert_desc_to_long_string(value: c_int) -> &'static CStr {
    match AlertDescription::from(value as u8) {
        AlertDescription::CloseNotify => c"close notify",
        AlertDescription::UnexpectedMessage => c"unexpected_message",
        AlertDescription::BadRecordMac => c"bad record mac",
        AlertDescription::DecryptionFailed => c"decryption failed",
        AlertDescription::RecordOverflow => c"record overflow",
        AlertDescription::DecompressionFailure => c"decompression failure",
        AlertDescription::HandshakeFailure => c"handshake failure",
        AlertDescription::NoCertificate => c"no certificate",
        AlertDescription::BadCertificate => c"bad certificate",
        AlertDescription::UnsupportedCertificate => c"unsupported certificate",
        AlertDescription::CertificateRevoked => c"certificate revoked",
        AlertDescription::CertificateExpired => c"certificate expired",
        AlertDescription::CertificateUnknown => c"certificate unknown",
        AlertDescription::IllegalParameter => c"illegal parameter",
        AlertDescription::UnknownCA => c"unknown CA",
        AlertDescription::AccessDenied => c"access denied",
        AlertDescription::DecodeError => c"decode error",
        AlertDescription::DecryptError => c"decrypt error",
        AlertDescription::ExportRestriction => c"export restriction",
        AlertDescription::ProtocolVersion => c"protocol version",
        AlertDescription::InsufficientSecurity => c"insufficient security",
        AlertDescription::InternalError => c"internal error",
        AlertDescription::UserCanceled => c"user canceled",
        AlertDescription::NoRenegotiation => c"no renegotiation",
        AlertDescription::UnsupportedExtension => c"unsupported extension",
        AlertDescription::UnrecognisedName => c"unrecognized name",
        _ => c"unknown",
    }
}

pub fn alert_desc_to_short_string(value: c_int) -> &'static CStr {
    match AlertDescription::from(value as u8) {
        AlertDescription::CloseNotify => c"CN",
        AlertDescription::UnexpectedMessage => c"UM",
        AlertDescription::BadRecordMac => c"BM",
        AlertDescription::DecryptionFailed => c"DC",
        AlertDescription::RecordOverflow => c"RO",
        AlertDescription::DecompressionFailure => c"DF",
        AlertDescription::HandshakeFailure => c"HF",
        AlertDescription::NoCertificate => c"NC",
        AlertDescription::BadCertificate => c"BC",
        AlertDescription::UnsupportedCertificate => c"UC",
        AlertDescription::CertificateRevoked => c"CR",
        AlertDescription::CertificateExpired => c"CE",
        AlertDescription::CertificateUnknown => c"CU",
        AlertDescription::IllegalParameter => c"IP",
        AlertDescription::UnknownCA => c"CA",
        AlertDescription::AccessDenied => c"AD",
        AlertDescription::DecodeError => c"DE",
        AlertDescription::DecryptError => c"CY",
        AlertDescription::ExportRestriction => c"ER",
        AlertDescription::ProtocolVersion => c"PV",
        AlertDescription::InsufficientSecurity => c"IS",
        AlertDescription::InternalError => c"IE",
        AlertDescription::UserCanceled => c"US",
        AlertDescription::NoRenegotiation => c"NR",
        AlertDescription::UnsupportedExtension => c"UE",
        AlertDescription::UnrecognisedName => c"UN",
        _ => c"UK",
    }
}

/// `SSL_alert_type_string_long` takes the combined `level << 8 | desc` value.
pub fn alert_level_to_long_string(value: c_int) -> &'static CStr {
    match (value >> 8) as u8 {
        ALERT_LEVEL_WARNING => c"warning",
        ALERT_LEVEL_FATAL => c"fatal",
        _ => c"unknown",
    }
}

pub fn alert_level_to_short_string(value: c_int) -> &'static CStr {
    match (value >> 8) as u8 {
        ALERT_LEVEL_WARNING => c"W",
        ALERT_LEVEL_FATAL => c"F",
        _ => c"U",
    }
}
