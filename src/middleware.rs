use crate::{
    datastore::Datastore,
    services::{
        auth::{AuthorizationService, PasswordService, TokenManager},
        user::{User, UserService},
    },
};
use actix_session::SessionExt;
use actix_web::{
    Error, FromRequest, HttpMessage, HttpRequest, HttpResponse,
    body::EitherBody,
    dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    web::Data,
};
use actix_web_httpauth::extractors::basic::BasicAuth;
use anyhow::Result;
use log::{debug, error};
use std::{
    future::{Future, Ready, ready},
    pin::Pin,
    rc::Rc,
};

/// The authenticated user of a request, attached by [`AuthMw`]
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

impl FromRequest for CurrentUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<CurrentUser>()
                .cloned()
                .ok_or_else(|| actix_web::error::ErrorUnauthorized("not logged in")),
        )
    }
}

pub struct AuthMw;

impl<S, B> Transform<S, ServiceRequest> for AuthMw
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct AuthMiddleware<S> {
    service: Rc<S>,
}

type LocalBoxFuture<T> = Pin<Box<dyn Future<Output = T> + 'static>>;

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        Box::pin(async move {
            let (Some(datastore), Some(token_manager)) = (
                req.app_data::<Data<Datastore>>().cloned(),
                req.app_data::<Data<TokenManager>>().cloned(),
            ) else {
                error!("auth middleware misses datastore or token manager");
                let http_res = HttpResponse::InternalServerError().finish();
                let (http_req, _) = req.into_parts();
                return Ok(ServiceResponse::new(http_req, http_res).map_into_right_body());
            };

            let token = match req.get_session().get::<String>("token") {
                Ok(token) => token.unwrap_or_default(),
                Err(e) => {
                    error!("failed to get session. {e:#}");
                    String::new()
                }
            };

            let user = if token.is_empty() {
                None
            } else {
                token_manager
                    .verify_token(&token)
                    .and_then(|name| session_user(&datastore, &name))
            };

            let user = match user {
                Some(user) => Some(user),
                // the body stays with the request, uploads may use basic auth
                None => match BasicAuth::extract(req.request()).await {
                    Ok(auth) => verify_user(&datastore, auth),
                    Err(_) => None,
                },
            };

            let Some(user) = user else {
                return Ok(unauthorized_error(req).map_into_right_body());
            };

            req.extensions_mut().insert(CurrentUser(user));
            let res = service.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}

fn session_user(datastore: &Datastore, name: &str) -> Option<User> {
    match UserService::find_by_name(datastore, name) {
        Ok(Some(user)) if AuthorizationService::ensure_active(&user).is_ok() => Some(user),
        Ok(_) => {
            debug!("session of unknown or inactive user {name}");
            None
        }
        Err(e) => {
            error!("session_user() failed: {e:#}");
            None
        }
    }
}

fn verify_user(datastore: &Datastore, auth: BasicAuth) -> Option<User> {
    let password = auth.password()?;

    let result = PasswordService::validate_password(datastore, auth.user_id(), password)
        .and_then(|user| AuthorizationService::ensure_active(&user).map(|_| user));

    match result {
        Ok(user) => Some(user),
        Err(e) => {
            error!("verify_user() failed: {e:#}");
            None
        }
    }
}

fn unauthorized_error(req: ServiceRequest) -> ServiceResponse {
    let http_res = HttpResponse::Unauthorized().finish();
    let (http_req, _) = req.into_parts();
    ServiceResponse::new(http_req, http_res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::user::{Role, UserStatus};
    use actix_http::StatusCode;
    use actix_session::{
        SessionMiddleware,
        config::{BrowserSession, CookieContentSecurity},
        storage::{CookieSessionStore, SessionStore},
    };
    use actix_web::{
        App, HttpResponse, Responder,
        cookie::{Cookie, CookieJar, Key, SameSite},
        test, web,
    };
    use actix_web_httpauth::headers::authorization::Basic;
    use base64::prelude::*;
    use std::collections::HashMap;

    const SESSION_SECRET: [u8; 64] = [
        0xb2, 0x64, 0x83, 0x0, 0xf5, 0xcb, 0xf6, 0x1d, 0x5c, 0x83, 0xc0, 0x90, 0x6b, 0xb2, 0xe4,
        0x26, 0x14, 0x9, 0x2b, 0xa1, 0xc4, 0xc5, 0x37, 0xe7, 0xc9, 0x20, 0x8e, 0xbc, 0xee, 0x2,
        0x3c, 0xa2, 0x32, 0x57, 0x96, 0xc9, 0x99, 0x62, 0x90, 0x4f, 0x24, 0xe5, 0x25, 0x6b, 0xe1,
        0x2b, 0x8a, 0x3, 0xa3, 0xc7, 0x1e, 0xb2, 0xb2, 0xbe, 0x29, 0x51, 0xc1, 0xe2, 0x1e, 0xb7,
        0x8, 0x15, 0xc9, 0xe0,
    ];
    const SESSION_ID: &str = "alarmdecoder-session";
    const TOKEN_SECRET: &str = "test-token-secret";

    async fn whoami(user: CurrentUser) -> impl Responder {
        HttpResponse::Ok().body(user.0.name)
    }

    fn datastore() -> Datastore {
        let datastore = Datastore::in_memory().unwrap();
        PasswordService::store_or_update_password(&datastore, "admin", "some-password").unwrap();
        datastore
    }

    async fn create_service(
        datastore: Datastore,
    ) -> impl actix_service::Service<
        actix_http::Request,
        Response = ServiceResponse,
        Error = actix_web::Error,
    > {
        let key = Key::from(&SESSION_SECRET);
        let session_middleware = SessionMiddleware::builder(CookieSessionStore::default(), key)
            .cookie_name(String::from(SESSION_ID))
            .cookie_secure(true)
            .session_lifecycle(BrowserSession::default())
            .cookie_same_site(SameSite::Strict)
            .cookie_content_security(CookieContentSecurity::Private)
            .cookie_http_only(true)
            .build();

        test::init_service(
            App::new()
                .wrap(session_middleware)
                .app_data(Data::new(datastore))
                .app_data(Data::new(TokenManager::new(TOKEN_SECRET)))
                .route("/", web::get().to(whoami).wrap(AuthMw)),
        )
        .await
    }

    async fn create_cookie_for_token(token: &str) -> Cookie<'static> {
        let key = Key::from(&SESSION_SECRET);
        let mut cookie_jar = CookieJar::new();
        let mut private_jar = cookie_jar.private_mut(&key);
        let session_store = CookieSessionStore::default();
        let ttl = actix_web::cookie::time::Duration::hours(2);

        let session_value = session_store
            .save(
                HashMap::from([("token".to_string(), format!("\"{token}\""))]),
                &ttl,
            )
            .await
            .unwrap()
            .as_ref()
            .to_string();

        private_jar.add(Cookie::new(SESSION_ID, session_value));

        cookie_jar.get(SESSION_ID).unwrap().clone()
    }

    fn basic_auth(user: &str, password: &str) -> (&'static str, String) {
        let encoded = BASE64_STANDARD.encode(format!("{user}:{password}"));
        ("Authorization", format!("Basic {encoded}"))
    }

    #[tokio::test]
    async fn valid_session_token_should_succeed() {
        let app = create_service(datastore()).await;
        let token = TokenManager::new(TOKEN_SECRET).create_token("admin").unwrap();
        let cookie = create_cookie_for_token(&token).await;

        let req = test::TestRequest::default().cookie(cookie).to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
        assert_eq!(test::read_body(resp).await, "admin");
    }

    #[tokio::test]
    async fn token_with_other_secret_should_require_login() {
        let app = create_service(datastore()).await;
        let token = TokenManager::new("other-token-secret").create_token("admin").unwrap();
        let cookie = create_cookie_for_token(&token).await;

        let req = test::TestRequest::default().cookie(cookie).to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn token_of_unknown_user_should_require_login() {
        let app = create_service(datastore()).await;
        let token = TokenManager::new(TOKEN_SECRET).create_token("ghost").unwrap();
        let cookie = create_cookie_for_token(&token).await;

        let req = test::TestRequest::default().cookie(cookie).to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn correct_user_credentials_should_succeed() {
        let app = create_service(datastore()).await;

        let req = test::TestRequest::default()
            .insert_header(basic_auth("admin", "some-password"))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
    }

    #[tokio::test]
    async fn credentials_of_second_user_should_select_that_user() {
        let datastore = datastore();
        PasswordService::store_or_update_password(&datastore, "installer", "installer-pass")
            .unwrap();
        let app = create_service(datastore).await;

        let req = test::TestRequest::default()
            .insert_header(basic_auth("installer", "installer-pass"))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
        assert_eq!(test::read_body(resp).await, "installer");
    }

    #[tokio::test]
    async fn invalid_user_credentials_should_return_unauthorized_error() {
        let app = create_service(datastore()).await;

        for (user, password) in [("admin", "some-other-password"), ("nobody", "some-password")] {
            let req = test::TestRequest::default()
                .insert_header(basic_auth(user, password))
                .to_request();
            let resp = test::call_service(&app, req).await;

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn inactive_user_should_return_unauthorized_error() {
        let datastore = datastore();
        let user = UserService::find_by_name(&datastore, "admin").unwrap().unwrap();
        let inactive = User {
            status: UserStatus::Inactive,
            role: Role::Admin,
            ..user
        };
        UserService::update_profile(&datastore, &inactive, None, &Default::default()).unwrap();
        let app = create_service(datastore).await;

        let req = test::TestRequest::default()
            .insert_header(basic_auth("admin", "some-password"))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_credentials_should_return_unauthorized_error() {
        let app = create_service(datastore()).await;

        let req = test::TestRequest::default().to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn verify_user_with_unset_password_should_fail() {
        let basic_auth = BasicAuth::from(Basic::new("admin", None::<&str>));

        assert!(verify_user(&datastore(), basic_auth).is_none());
    }
}
