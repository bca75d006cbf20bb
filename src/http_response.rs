use crate::{
    host_system::EthernetInfo,
    services::{
        archive::ExportedArchive,
        host::{HostInfo, HostnameUpdate},
        network::{NetworkSettings, SetNetworkResponse},
        profile::Profile,
    },
};
use actix_web::{
    HttpResponse,
    http::header::{ContentDisposition, DispositionParam, DispositionType},
};
use anyhow::Result;
use log::error;
use serde::Serialize;

/// Trait for converting service results into HTTP responses
pub trait ServiceResultResponse {
    fn into_response(self) -> HttpResponse;
}

impl ServiceResultResponse for () {
    fn into_response(self) -> HttpResponse {
        HttpResponse::Ok().finish()
    }
}

impl ServiceResultResponse for String {
    fn into_response(self) -> HttpResponse {
        HttpResponse::Ok().body(self)
    }
}

impl ServiceResultResponse for ExportedArchive {
    fn into_response(self) -> HttpResponse {
        HttpResponse::Ok()
            .content_type("application/x-gzip")
            .insert_header(ContentDisposition {
                disposition: DispositionType::Attachment,
                parameters: vec![DispositionParam::Filename(self.file_name)],
            })
            .body(self.data)
    }
}

macro_rules! json_response {
    ($($type:ty),+ $(,)?) => {
        $(
            impl ServiceResultResponse for $type {
                fn into_response(self) -> HttpResponse {
                    json(&self, stringify!($type))
                }
            }
        )+
    };
}

json_response!(
    EthernetInfo,
    HostInfo,
    HostnameUpdate,
    NetworkSettings,
    Profile,
    SetNetworkResponse,
);

pub(crate) fn json<T: Serialize>(data: &T, type_name: &str) -> HttpResponse {
    match serde_json::to_string(data) {
        Ok(json) => HttpResponse::Ok()
            .content_type("application/json")
            .body(json),
        Err(e) => {
            error!("failed to serialize {type_name}: {e:#}");
            HttpResponse::InternalServerError().body("failed to serialize response")
        }
    }
}

/// Handle Result and convert data to Response
///
/// Puts the data or the error in a corresponding response.
///
/// # Arguments
/// * `result` - The Result to handle
/// * `operation` - Context message describing the operation
///
/// # Returns
/// * `HttpResponse` - The ServiceResultResponse (HttpResponse::Ok or HttpResponse::InternalServerError)
pub fn handle_service_result<T>(result: Result<T>, operation: &str) -> HttpResponse
where
    T: ServiceResultResponse,
{
    match result {
        Ok(data) => data.into_response(),
        Err(e) => {
            error!("{operation} failed: {e:#}");
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}
