use crate::{
    config::HostConfig,
    datastore::Datastore,
    decoder_bridge::DecoderBridge,
    host_system::HostSystem,
    http_response::{ServiceResultResponse, handle_service_result, json},
    middleware::{AuthMw, CurrentUser},
    services::{
        archive::ArchiveError,
        auth::{AuthorizationService, ChangePasswordRequest, PasswordService, TokenManager},
        backup::{BackupService, RuntimeContext},
        host::{HostService, SetHostnameRequest},
        network::{NetworkService, SetNetworkRequest},
        profile::{ProfileService, UpdateProfileRequest},
        settings::SettingsStore,
    },
};
use actix_files::NamedFile;
use actix_multipart::form::{MultipartForm, tempfile::TempFile};
use actix_session::Session;
use actix_web::{HttpResponse, Responder, web};
use anyhow::{Context, Result};
use log::{debug, error, info};
use serde::Serialize;
use serde_valid::Validate;
use std::path::PathBuf;

#[derive(MultipartForm)]
pub struct AvatarForm {
    avatar_file: TempFile,
}

#[derive(MultipartForm)]
pub struct ImportForm {
    import_file: TempFile,
}

/// State shared by the settings pages
#[derive(Debug, Serialize)]
pub struct SettingsIndex {
    pub ssl: bool,
}

impl ServiceResultResponse for SettingsIndex {
    fn into_response(self) -> HttpResponse {
        json(&self, "SettingsIndex")
    }
}

#[derive(Clone)]
pub struct Api<Bridge, Host>
where
    Bridge: DecoderBridge,
    Host: HostSystem,
{
    pub datastore: Datastore,
    pub bridge: Bridge,
    pub host: Host,
    pub host_files: HostConfig,
    pub upload_dir: PathBuf,
}

impl<Bridge, Host> Api<Bridge, Host>
where
    Bridge: DecoderBridge,
    Host: HostSystem,
{
    pub fn new(
        datastore: Datastore,
        bridge: Bridge,
        host: Host,
        host_files: HostConfig,
        upload_dir: PathBuf,
    ) -> Self {
        Api {
            datastore,
            bridge,
            host,
            host_files,
            upload_dir,
        }
    }

    pub async fn login(
        user: CurrentUser,
        session: Session,
        token_manager: web::Data<TokenManager>,
    ) -> impl Responder {
        debug!("login() called");

        let token = match token_manager.create_token(&user.0.name) {
            Ok(token) => token,
            Err(e) => {
                error!("failed to create token: {e:#}");
                return HttpResponse::InternalServerError().body("failed to create token");
            }
        };

        if session.insert("token", &token).is_err() || session.insert("user", &user.0.name).is_err()
        {
            error!("failed to insert token into session");
            return HttpResponse::InternalServerError().body("failed to insert token into session");
        }

        info!("{} logged in", user.0.name);
        HttpResponse::Ok().body(token)
    }

    pub async fn logout(session: Session) -> impl Responder {
        debug!("logout() called");
        session.purge();
        HttpResponse::Ok().finish()
    }

    pub async fn version() -> impl Responder {
        HttpResponse::Ok().body(env!("CARGO_PKG_VERSION"))
    }

    pub async fn index(api: web::Data<Self>) -> impl Responder {
        debug!("index() called");
        handle_service_result(api.settings_index(), "index")
    }

    pub async fn profile(api: web::Data<Self>, user: CurrentUser) -> impl Responder {
        debug!("profile() called");
        handle_service_result(ProfileService::profile(&api.datastore, &user.0), "profile")
    }

    pub async fn update_profile(
        body: web::Json<UpdateProfileRequest>,
        api: web::Data<Self>,
        user: CurrentUser,
    ) -> impl Responder {
        debug!("update_profile() called");

        if let Err(e) = body.validate() {
            error!("invalid profile: {e}");
            return HttpResponse::BadRequest().body(e.to_string());
        }

        handle_service_result(
            ProfileService::update(&api.datastore, &user.0, body.into_inner()),
            "update_profile",
        )
    }

    pub async fn upload_avatar(
        MultipartForm(form): MultipartForm<AvatarForm>,
        api: web::Data<Self>,
        user: CurrentUser,
    ) -> impl Responder {
        debug!("upload_avatar() called");

        let Some(file_name) = form.avatar_file.file_name.clone() else {
            return HttpResponse::BadRequest().body("avatar file is missing");
        };

        let result = async {
            let content = tokio::fs::read(form.avatar_file.file.path())
                .await
                .context("failed to read uploaded avatar")?;

            ProfileService::save_avatar(
                &api.datastore,
                &api.upload_dir,
                &user.0,
                &file_name,
                &content,
            )
        }
        .await;

        handle_service_result(result, "upload_avatar")
    }

    pub async fn avatar(
        path: web::Path<String>,
        api: web::Data<Self>,
        user: CurrentUser,
    ) -> actix_web::Result<NamedFile> {
        debug!("avatar() called");

        let path = ProfileService::avatar_path(&api.upload_dir, &user.0, &path).map_err(|e| {
            error!("avatar failed: {e:#}");
            actix_web::error::ErrorNotFound("avatar not found")
        })?;

        Ok(NamedFile::open(path)?)
    }

    pub async fn update_password(
        body: web::Json<ChangePasswordRequest>,
        api: web::Data<Self>,
        user: CurrentUser,
    ) -> impl Responder {
        debug!("update_password() called");

        if let Err(e) = PasswordService::validate_change(&user.0, &body) {
            error!("validate_change failed: {e:#}");
            return HttpResponse::BadRequest().body(e.to_string());
        }

        let result = PasswordService::update_password(&api.datastore, user.0.id, &body.new_password)
            .and_then(|_| api.settings_index());

        handle_service_result(result, "update_password")
    }

    pub async fn host(api: web::Data<Self>, user: CurrentUser) -> impl Responder {
        debug!("host() called");

        if let Some(forbidden) = Self::forbidden(&user, "host") {
            return forbidden;
        }

        handle_service_result(HostService::info(&api.host).await, "host")
    }

    pub async fn hostname(api: web::Data<Self>, user: CurrentUser) -> impl Responder {
        debug!("hostname() called");

        if let Some(forbidden) = Self::forbidden(&user, "hostname") {
            return forbidden;
        }

        handle_service_result(api.host.fqdn().await, "hostname")
    }

    pub async fn set_hostname(
        body: web::Json<SetHostnameRequest>,
        api: web::Data<Self>,
        user: CurrentUser,
    ) -> impl Responder {
        debug!("set_hostname() called");

        if let Some(forbidden) = Self::forbidden(&user, "set_hostname") {
            return forbidden;
        }

        handle_service_result(
            HostService::set_hostname(&api.host, &api.host_files, &body).await,
            "set_hostname",
        )
    }

    pub async fn ethernet_info(
        device: web::Path<String>,
        api: web::Data<Self>,
        user: CurrentUser,
    ) -> impl Responder {
        debug!("ethernet_info() called for {device}");

        if let Some(forbidden) = Self::forbidden(&user, "ethernet_info") {
            return forbidden;
        }

        handle_service_result(api.host.ethernet_info(&device).await, "ethernet_info")
    }

    pub async fn reboot(api: web::Data<Self>, user: CurrentUser) -> impl Responder {
        debug!("reboot() called");

        if let Some(forbidden) = Self::forbidden(&user, "reboot") {
            return forbidden;
        }

        handle_service_result(HostService::reboot(&api.host).await, "reboot")
    }

    pub async fn network(
        device: web::Path<String>,
        api: web::Data<Self>,
        user: CurrentUser,
    ) -> impl Responder {
        debug!("network() called for {device}");

        if let Some(forbidden) = Self::forbidden(&user, "network") {
            return forbidden;
        }

        handle_service_result(
            NetworkService::settings(&api.host, &api.host_files.network_file, &device).await,
            "network",
        )
    }

    pub async fn set_network(
        device: web::Path<String>,
        body: web::Json<SetNetworkRequest>,
        api: web::Data<Self>,
        user: CurrentUser,
    ) -> impl Responder {
        debug!("set_network() called for {device}");

        if let Some(forbidden) = Self::forbidden(&user, "set_network") {
            return forbidden;
        }

        handle_service_result(
            NetworkService::set_settings(&api.host, &api.host_files.network_file, &device, &body)
                .await,
            "set_network",
        )
    }

    pub async fn export(api: web::Data<Self>, user: CurrentUser) -> impl Responder {
        debug!("export() called");

        if let Some(forbidden) = Self::forbidden(&user, "export") {
            return forbidden;
        }

        handle_service_result(
            BackupService::export(&api.datastore).map_err(anyhow::Error::from),
            "export",
        )
    }

    pub async fn import(
        MultipartForm(form): MultipartForm<ImportForm>,
        api: web::Data<Self>,
        user: CurrentUser,
    ) -> impl Responder {
        debug!("import() called");

        if let Some(forbidden) = Self::forbidden(&user, "import") {
            return forbidden;
        }

        let archive = match tokio::fs::read(form.import_file.file.path()).await {
            Ok(archive) => archive,
            Err(e) => {
                error!("failed to read uploaded archive: {e:#}");
                return HttpResponse::InternalServerError().body("failed to read uploaded archive");
            }
        };

        let context = RuntimeContext {
            datastore: &api.datastore,
            bridge: &api.bridge,
        };

        match BackupService::import(&context, &archive).await {
            Ok(summary) => {
                info!("Successfully imported backup file.");
                HttpResponse::Found()
                    .insert_header(("Location", "/"))
                    .json(summary)
            }
            Err(e @ ArchiveError::MalformedArchive(_)) => {
                error!("import failed: {e:#}");
                HttpResponse::BadRequest().body("Import Failed: Not a valid AlarmDecoder archive.")
            }
            Err(e @ (ArchiveError::Io(_) | ArchiveError::Datastore(_))) => {
                error!("import failed: {e:#}");
                HttpResponse::InternalServerError().body(format!("Import failed: {e}"))
            }
            Err(e) => {
                error!("import failed: {e:#}");
                HttpResponse::BadRequest().body(format!("Import failed: {e}"))
            }
        }
    }

    fn settings_index(&self) -> Result<SettingsIndex> {
        Ok(SettingsIndex {
            ssl: SettingsStore::value_or(&self.datastore, "use_ssl", false)?,
        })
    }

    fn forbidden(user: &CurrentUser, operation: &str) -> Option<HttpResponse> {
        let Err(e) = AuthorizationService::ensure_admin(&user.0) else {
            return None;
        };

        error!("{operation} denied: {e:#}");
        Some(HttpResponse::Forbidden().body(e.to_string()))
    }
}

impl<Bridge, Host> Api<Bridge, Host>
where
    Bridge: DecoderBridge + 'static,
    Host: HostSystem + 'static,
{
    /// Register all routes
    ///
    /// The app has to provide `Data<Self>`, `Data<Datastore>` and
    /// `Data<TokenManager>` and wrap a session middleware.
    pub fn routes(cfg: &mut web::ServiceConfig) {
        cfg.route("/login", web::post().to(Self::login).wrap(AuthMw))
            .route("/logout", web::post().to(Self::logout))
            .route("/version", web::get().to(Self::version))
            .service(
                web::scope("/settings")
                    .wrap(AuthMw)
                    .route("", web::get().to(Self::index))
                    .route("/", web::get().to(Self::index))
                    .route("/profile", web::get().to(Self::profile))
                    .route("/profile", web::post().to(Self::update_profile))
                    .route("/profile/avatar", web::post().to(Self::upload_avatar))
                    .route("/avatar/{file}", web::get().to(Self::avatar))
                    .route("/password", web::post().to(Self::update_password))
                    .route("/host", web::get().to(Self::host))
                    .route("/hostname", web::get().to(Self::hostname))
                    .route("/hostname", web::post().to(Self::set_hostname))
                    .route(
                        "/get_ethernet_info/{device}",
                        web::get().to(Self::ethernet_info),
                    )
                    .route("/reboot", web::post().to(Self::reboot))
                    .route("/network/{device}", web::get().to(Self::network))
                    .route("/network/{device}", web::post().to(Self::set_network))
                    .route("/export", web::get().to(Self::export))
                    .route("/import", web::post().to(Self::import)),
            );
    }
}
