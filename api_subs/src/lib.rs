use actix_web::web::{self};

pub mod routes {
    pub mod pay;
    pub mod sub;
}

pub mod services {
    pub mod pay;
    pub mod sub;
}

mod dtos {
    pub(crate) mod pay;
    pub(crate) mod sub;
}

pub fn mount_subs() -> actix_web::Scope {
    web::scope("/sub")
        .service(routes::sub::get_plans)
        .service(routes::sub::get_current)
        .service(routes::sub::post_checkout)
        .service(routes::sub::post_cancel)
        .service(routes::sub::post_auto_renew)
}

pub fn mount_webhook() -> actix_web::Scope {
    web::scope("/pay").service(routes::pay::post_webhook)
}
