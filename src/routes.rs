use std::future::{ready, Ready};

use actix_web::{
    dev::Payload, get, http::header, post, web, FromRequest, HttpRequest, HttpResponse,
};
use futures::{stream, StreamExt};
use serde_json::json;

use crate::auth::bearer_token;
use crate::context::AppContext;
use crate::error::AppError;
use crate::forms::{
    self, AddExpenseForm, CreateGroupForm, JoinGroupForm, LoginForm, RegisterForm, SettleUpForm,
};
use crate::identity::CurrentUser;
use crate::views::{load_dashboard, member_group, GroupDetailView};

fn authenticate(request: &HttpRequest) -> Option<CurrentUser> {
    let context = request.app_data::<web::Data<AppContext>>()?;
    let token = bearer_token(request)?;
    let uid = context.identity().verify(token)?;
    Some(CurrentUser { uid })
}

impl FromRequest for CurrentUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(request: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(authenticate(request).ok_or(AppError::Unauthenticated))
    }
}

#[post("/register")]
async fn register(
    context: web::Data<AppContext>,
    form: web::Json<RegisterForm>,
) -> Result<HttpResponse, AppError> {
    let signed_in = forms::register(&context, form.into_inner()).await?;
    Ok(HttpResponse::Created().json(signed_in))
}

#[post("/login")]
async fn login(
    context: web::Data<AppContext>,
    form: web::Json<LoginForm>,
) -> Result<HttpResponse, AppError> {
    let signed_in = forms::login(&context, form.into_inner()).await?;
    Ok(HttpResponse::Ok().json(signed_in))
}

#[post("/logout")]
async fn logout(
    context: web::Data<AppContext>,
    request: HttpRequest,
    _user: CurrentUser,
) -> HttpResponse {
    if let Some(token) = bearer_token(&request) {
        context.identity().sign_out(token).await;
    }
    HttpResponse::Ok().json(json!({ "message": "Signed out." }))
}

#[get("/join")]
async fn join_form(query: web::Query<JoinGroupForm>) -> HttpResponse {
    HttpResponse::Ok().json(forms::join_prefill(query.into_inner()))
}

#[post("/join")]
async fn join(
    context: web::Data<AppContext>,
    user: Option<CurrentUser>,
    form: web::Json<JoinGroupForm>,
) -> Result<HttpResponse, AppError> {
    let joined = forms::join_group(&context, user.as_ref(), form.into_inner()).await?;
    Ok(HttpResponse::Ok().json(joined))
}

#[get("/")]
async fn dashboard(
    context: web::Data<AppContext>,
    user: CurrentUser,
) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(load_dashboard(&context, &user).await?))
}

#[post("/create")]
async fn create_group(
    context: web::Data<AppContext>,
    user: CurrentUser,
    form: web::Json<CreateGroupForm>,
) -> Result<HttpResponse, AppError> {
    let group = forms::create_group(&context, &user, form.into_inner()).await?;
    Ok(HttpResponse::Created().json(group))
}

#[get("/groups/{id}")]
async fn group_detail(
    context: web::Data<AppContext>,
    user: CurrentUser,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let (view, snapshot) = GroupDetailView::load(&context, &id, &user).await?;
    view.dispose();
    Ok(HttpResponse::Ok().json(snapshot))
}

/// Server-sent events. The first event is the complete current snapshot, then
/// one per change. The stream ends when either collection stops updating, and
/// the subscriptions are released when the client goes away.
#[get("/groups/{id}/live")]
async fn group_live(
    context: web::Data<AppContext>,
    user: CurrentUser,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let (view, first) = GroupDetailView::load(&context, &id, &user).await?;
    let updates = stream::unfold(view, |mut view| async move {
        let snapshot = view.next_update().await?;
        Some((snapshot, view))
    });
    let events = stream::once(ready(first)).chain(updates).map(|snapshot| {
        serde_json::to_string(&snapshot).map(|data| web::Bytes::from(format!("data: {data}\n\n")))
    });
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(events))
}

#[get("/groups/{id}/invite")]
async fn invite(
    context: web::Data<AppContext>,
    user: CurrentUser,
    id: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let group = member_group(&**context.store(), &id, &user).await?;
    Ok(HttpResponse::Ok().json(json!({ "link": context.invite_link(&group.id) })))
}

#[post("/groups/{id}/add")]
async fn add_expense(
    context: web::Data<AppContext>,
    user: CurrentUser,
    id: web::Path<String>,
    form: web::Json<AddExpenseForm>,
) -> Result<HttpResponse, AppError> {
    let expense = forms::add_expense(&context, &user, &id, form.into_inner()).await?;
    Ok(HttpResponse::Created().json(expense))
}

#[post("/groups/{id}/settle")]
async fn settle_up(
    context: web::Data<AppContext>,
    user: CurrentUser,
    id: web::Path<String>,
    form: web::Json<SettleUpForm>,
) -> Result<HttpResponse, AppError> {
    let settlement = forms::settle_up(&context, &user, &id, form.into_inner()).await?;
    Ok(HttpResponse::Created().json(settlement))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(register)
        .service(login)
        .service(logout)
        .service(join_form)
        .service(join)
        .service(dashboard)
        .service(create_group)
        .service(group_live)
        .service(invite)
        .service(add_expense)
        .service(settle_up)
        .service(group_detail);
}
