use anyhow::{anyhow, Result};
use embedded_svc::http::Method;
use embedded_svc::io::{Read as _, Write};
use esp_idf_svc::http::server::{Configuration, EspHttpServer};
use ota_core::{OtaError, UpdateController, UpdateMode};
use std::io::Read as _;
use std::sync::{Arc, Mutex, MutexGuard};

use super::error_handler::ErrorResponse;
use super::validators;
use super::HttpRequest;
use crate::ota::EspImageSink;

pub type SharedController = Arc<Mutex<UpdateController<EspImageSink>>>;

const FILE_CHUNK_SIZE: usize = 4096;

/// HTTP surface of the updater.
///
/// Every handler locks the controller for one synchronous call at a time,
/// so the control loop can keep polling the reboot scheduler in between
/// chunks of a long upload.
pub struct UpdateServer {
    _server: EspHttpServer<'static>,
}

#[derive(Debug)]
enum UploadError {
    Transport(anyhow::Error),
    Rejected(OtaError),
}

impl From<OtaError> for UploadError {
    fn from(err: OtaError) -> Self {
        UploadError::Rejected(err)
    }
}

impl UpdateServer {
    pub fn new(controller: SharedController, port: u16) -> Result<Self> {
        let chunk_size = lock(&controller)?.settings().chunk_size.max(512);

        let mut server = EspHttpServer::new(&Configuration {
            http_port: port,
            stack_size: 10240,
            ..Default::default()
        })?;

        // Begin an update: /ota/start?mode=fs|fw&hash=<sha256>
        let ctrl = controller.clone();
        server.fn_handler("/ota/start", Method::Get, move |req| {
            let mode = validators::query_param(req.uri(), "mode").unwrap_or_default();
            let hash = validators::query_param(req.uri(), "hash");

            let result = lock(&ctrl)?.start(UpdateMode::from_token(&mode), hash.as_deref());
            match result {
                Ok(()) => send_ok(req),
                Err(e) => ErrorResponse::from(&e).send_text(req),
            }
        })?;

        // Image body, streamed straight into flash
        let ctrl = controller.clone();
        server.fn_handler("/ota/upload", Method::Post, move |mut req| {
            let result = stream_body(&mut req, chunk_size, |index, bytes, is_final| {
                lock(&ctrl)
                    .map_err(UploadError::Transport)?
                    .ingest(index, bytes, is_final)?;
                Ok(())
            });

            match result {
                Ok(total) => {
                    log::info!("Image upload finished ({} bytes)", total);
                    send_ok(req)
                }
                Err(UploadError::Rejected(e)) => ErrorResponse::from(&e).send_text(req),
                Err(UploadError::Transport(e)) => {
                    lock(&ctrl)?.abort();
                    ErrorResponse::bad_request(e.to_string()).send_text(req)
                }
            }
        })?;

        // Single file into the filesystem (restore after a filesystem update)
        let ctrl = controller.clone();
        server.fn_handler("/ota/uploadfile", Method::Post, move |mut req| {
            let header = validators::validate_filename_header(req.header("X-Filename"))
                .map(str::to_string);
            let filename = match header {
                Ok(filename) => filename,
                Err(e) => return ErrorResponse::bad_request(e.to_string()).send_json(req),
            };

            let mut last = None;
            let result = stream_body(&mut req, chunk_size, |index, bytes, is_final| {
                let outcome = lock(&ctrl)
                    .map_err(UploadError::Transport)?
                    .ingest_file(&filename, index, bytes, is_final)?;
                last = Some(outcome);
                Ok(())
            });

            match result {
                Ok(_) => {
                    if let Some(outcome) = last {
                        log::info!(
                            "Stored {} ({} bytes){}",
                            outcome.path,
                            outcome.bytes_written,
                            outcome
                                .restore
                                .map(|progress| format!(", restore {:?}", progress))
                                .unwrap_or_default()
                        );
                    }
                    let body = serde_json::json!({"status": 1, "text": "OK"}).to_string();
                    send_json(req, &body)
                }
                Err(UploadError::Rejected(e)) => ErrorResponse::from(&e).send_json(req),
                Err(UploadError::Transport(e)) => {
                    lock(&ctrl)?.abort_file();
                    ErrorResponse::bad_request(e.to_string()).send_json(req)
                }
            }
        })?;

        // Backup download: /ota/getfile?path=<logical path>
        let ctrl = controller.clone();
        server.fn_handler("/ota/getfile", Method::Get, move |req| {
            let Some(path) = validators::query_param(req.uri(), "path") else {
                return ErrorResponse::bad_request("Missing path parameter").send_json(req);
            };

            let opened = lock(&ctrl)?.open_file(&path);
            let mut file = match opened {
                Ok(file) => file,
                Err(e) => return ErrorResponse::from(&e).send_json(req),
            };

            let name = path.rsplit('/').next().unwrap_or("download");
            let disposition = format!("attachment; filename=\"{name}\"");
            let mut response = req.into_response(
                200,
                Some("OK"),
                &[
                    ("Content-Type", "application/octet-stream"),
                    ("Content-Disposition", disposition.as_str()),
                ],
            )?;

            let mut buf = vec![0u8; FILE_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                response.write_all(&buf[..n])?;
            }
            Ok(())
        })?;

        let ctrl = controller.clone();
        server.fn_handler("/getdeviceinfo", Method::Get, move |req| {
            let json = lock(&ctrl)?.device_info().to_json()?;
            send_json(req, &json)
        })?;

        let ctrl = controller.clone();
        server.fn_handler("/ota/status", Method::Get, move |req| {
            let json = serde_json::to_string(&lock(&ctrl)?.status())?;
            send_json(req, &json)
        })?;

        // Manual trigger for a reboot held back by disabled auto-reboot
        let ctrl = controller;
        server.fn_handler("/ota/reboot", Method::Post, move |req| {
            if !lock(&ctrl)?.reboot_pending() {
                return ErrorResponse::bad_request("No reboot pending").send_json(req);
            }

            {
                let mut response = req.into_ok_response()?;
                response.write_all(br#"{"status":"restarting"}"#)?;
                response.flush()?;
            }

            let mut restart = crate::system::reset::restart;
            lock(&ctrl)?.reboot_now(&mut restart);
            Ok(())
        })?;

        log::info!("OTA endpoints registered on port {}", port);
        Ok(Self { _server: server })
    }
}

fn lock(controller: &SharedController) -> Result<MutexGuard<'_, UpdateController<EspImageSink>>> {
    controller
        .lock()
        .map_err(|e| anyhow!("Failed to lock OTA controller: {}", e))
}

/// Fill `buf` from the request body. Returns fewer than `buf.len()` bytes
/// only at the end of the body.
fn read_chunk(req: &mut HttpRequest<'_, '_>, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = req
            .read(&mut buf[filled..])
            .map_err(|e| anyhow!("Failed to read request data: {:?}", e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Feed the request body to `ingest` as `(offset, bytes, is_final)`; the
/// last call always carries `is_final`, with an empty chunk when the body
/// ends on a chunk boundary. Returns the body length.
fn stream_body<F>(req: &mut HttpRequest<'_, '_>, chunk_size: usize, mut ingest: F) -> Result<usize, UploadError>
where
    F: FnMut(usize, &[u8], bool) -> Result<(), UploadError>,
{
    let mut buffer = vec![0u8; chunk_size];
    let mut offset = 0;
    loop {
        let len = read_chunk(req, &mut buffer).map_err(UploadError::Transport)?;
        let is_final = len < buffer.len();
        ingest(offset, &buffer[..len], is_final)?;
        offset += len;
        if is_final {
            return Ok(offset);
        }
    }
}

fn send_ok(req: HttpRequest<'_, '_>) -> Result<()> {
    let mut response = req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "text/plain"), ("Connection", "close")],
    )?;
    response.write_all(b"OK")?;
    Ok(())
}

fn send_json(req: HttpRequest<'_, '_>, body: &str) -> Result<()> {
    let mut response = req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json")],
    )?;
    response.write_all(body.as_bytes())?;
    Ok(())
}
