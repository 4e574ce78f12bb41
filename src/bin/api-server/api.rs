use actix_web::{web, HttpResponse};
use meal_catalog::{data::Dish, Catalog, CatalogError};

#[derive(serde::Serialize)]
struct ErrJsonResp {
    message: String,
}

fn err_resp(err: CatalogError) -> HttpResponse {
    let body = ErrJsonResp {
        message: err.to_string(),
    };
    match err {
        CatalogError::UnknownMeal(_) => HttpResponse::NotFound().json(body),
        CatalogError::InvalidSelection => HttpResponse::BadRequest().json(body),
        _ => HttpResponse::Ok().json(body),
    }
}

#[derive(serde::Serialize)]
struct MealView<'a> {
    #[serde(flatten)]
    dish: &'a Dish,
    stars: String,
}

fn meal_views(dishes: &[Dish]) -> Vec<MealView<'_>> {
    dishes
        .iter()
        .map(|dish| MealView {
            dish,
            stars: dish.stars(),
        })
        .collect()
}

#[derive(serde::Deserialize)]
pub(super) struct CountryQuery {
    q: Option<String>,
}

#[actix_web::get("/api/v1/countries")]
pub(super) async fn countries(
    data: web::Data<Catalog>,
    query: web::Query<CountryQuery>,
) -> HttpResponse {
    let pattern = query.q.as_deref().unwrap_or("");
    HttpResponse::Ok().json(data.search_countries(pattern).await)
}

#[derive(serde::Deserialize)]
pub(super) struct SelectCountry {
    country: String,
}

#[actix_web::post("/api/v1/countries/selected")]
pub(super) async fn select_country(
    data: web::Data<Catalog>,
    body: web::Json<SelectCountry>,
) -> HttpResponse {
    // load failures are already logged by the catalog
    let _ = data.select_country(&body.country).await;
    HttpResponse::Ok().json(meal_views(&data.visible_meals().await))
}

#[derive(serde::Deserialize)]
pub(super) struct Filters {
    search: Option<String>,
    min_rating: Option<u8>,
}

#[actix_web::put("/api/v1/filters")]
pub(super) async fn filters(data: web::Data<Catalog>, body: web::Json<Filters>) -> HttpResponse {
    if let Some(search) = &body.search {
        data.set_search(search).await;
    }
    if let Some(min_rating) = body.min_rating {
        data.set_min_rating(min_rating).await;
    }
    HttpResponse::Ok().json(serde_json::json!({
        "search": data.search().await,
        "min_rating": data.min_rating().await,
    }))
}

#[actix_web::get("/api/v1/meals")]
pub(super) async fn visible_meals(data: web::Data<Catalog>) -> HttpResponse {
    HttpResponse::Ok().json(meal_views(&data.visible_meals().await))
}

#[actix_web::get("/api/v1/meals/all")]
pub(super) async fn all_meals(data: web::Data<Catalog>) -> HttpResponse {
    let meals = data.filtered_meals().await;
    HttpResponse::Ok().json(serde_json::json!({
        "meals": meal_views(&meals),
        "progress": data.progress_percentage().await,
    }))
}

#[actix_web::get("/api/v1/meals/selected")]
pub(super) async fn viewed_meal(data: web::Data<Catalog>) -> HttpResponse {
    match data.viewed_dish().await {
        Ok(dish) => HttpResponse::Ok().json(dish),
        Err(err) => err_resp(err),
    }
}

#[derive(serde::Deserialize)]
pub(super) struct MealPath {
    id: String,
}

#[actix_web::post("/api/v1/meals/{id}/view")]
pub(super) async fn view_meal(data: web::Data<Catalog>, path: web::Path<MealPath>) -> HttpResponse {
    let Some(dish) = data.find_meal(&path.id).await else {
        return err_resp(CatalogError::UnknownMeal(path.id.clone()));
    };
    match data.view_details(&dish).await {
        Ok(()) => HttpResponse::Ok().json(dish),
        Err(err) => err_resp(err),
    }
}

async fn cart_resp(data: &Catalog) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "lines": data.cart().await,
        "total_items": data.total_items().await,
    }))
}

#[actix_web::get("/api/v1/cart")]
pub(super) async fn cart(data: web::Data<Catalog>) -> HttpResponse {
    cart_resp(&data).await
}

#[derive(serde::Deserialize)]
pub(super) struct AddToCart {
    id: String,
}

#[actix_web::post("/api/v1/cart")]
pub(super) async fn add_to_cart(
    data: web::Data<Catalog>,
    body: web::Json<AddToCart>,
) -> HttpResponse {
    let Some(dish) = data.find_meal(&body.id).await else {
        return err_resp(CatalogError::UnknownMeal(body.id.clone()));
    };
    if let Err(err) = data.add_to_cart(&dish).await {
        return err_resp(err);
    }
    cart_resp(&data).await
}

#[actix_web::delete("/api/v1/cart/{id}")]
pub(super) async fn remove_from_cart(
    data: web::Data<Catalog>,
    path: web::Path<MealPath>,
) -> HttpResponse {
    match data.remove_from_cart(&path.id).await {
        Ok(true) => cart_resp(&data).await,
        Ok(false) => err_resp(CatalogError::UnknownMeal(path.id.clone())),
        Err(err) => err_resp(err),
    }
}

pub(super) fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(countries)
        .service(select_country)
        .service(filters)
        .service(all_meals)
        .service(viewed_meal)
        .service(visible_meals)
        .service(view_meal)
        .service(cart)
        .service(add_to_cart)
        .service(remove_from_cart);
}
