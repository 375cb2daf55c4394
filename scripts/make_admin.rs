use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use std::env;

use hr_auth_api::db::model::{User, UserRole};
use hr_auth_api::db::schema::users;

fn main() {
    // Get database URL from environment
    let database_url = env::var("APP_DATABASE__URL").expect("APP_DATABASE__URL must be set");

    // Create connection pool
    let manager = ConnectionManager::<diesel::PgConnection>::new(database_url);
    let pool = Pool::builder()
        .build(manager)
        .expect("Failed to create pool");

    // Get email from command line args
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <user_email>", args[0]);
        std::process::exit(1);
    }
    let email = &args[1];

    // Get connection
    let mut conn = pool.get().expect("Failed to get connection");

    // Find user by email
    let user = users::table
        .filter(users::email.eq(email))
        .select(User::as_select())
        .first::<User>(&mut conn)
        .optional()
        .expect("Failed to query user");

    match user {
        Some(user) => {
            let updated_user = diesel::update(users::table)
                .filter(users::id.eq(user.id))
                .set(users::role.eq(UserRole::Admin))
                .returning(User::as_returning())
                .get_result::<User>(&mut conn)
                .expect("Failed to update user role");

            println!(
                "User {} is now {}",
                updated_user.email,
                updated_user.role.as_str()
            );
        }
        None => {
            eprintln!("No user found with email {}", email);
            std::process::exit(1);
        }
    }
}
