use actix_web::web::{self};

pub mod routes {
    pub mod entitlement;
}

pub mod services {
    pub mod entitlement;
}

mod dtos {
    pub(crate) mod entitlement;
}

pub fn mount_entitlement() -> actix_web::Scope {
    web::scope("/entitlement")
        .service(routes::entitlement::get_quota)
        .service(routes::entitlement::post_consume)
        .service(routes::entitlement::get_feature)
}
