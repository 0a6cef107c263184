use actix_web::{HttpResponse, Responder, get, web};

use crate::language::LanguageRegistry;

#[get("/languages")]
pub async fn get_languages_handler(languages: web::Data<LanguageRegistry>) -> impl Responder {
    let names: Vec<&str> = languages.names().collect();
    HttpResponse::Ok().json(names)
}
