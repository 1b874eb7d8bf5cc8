// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! First-start data: built-in roles and the optional seeded administrator.

use tracing::info;

use crate::api::users::create_account;
use crate::auth::{roles::ensure_builtin_roles, ADMIN_ROLE};
use crate::error::ApiError;
use crate::models::CreateUserRequest;
use crate::state::AppState;
use crate::storage::UserRepository;

/// Idempotent: existing roles and an existing seed account are left alone.
pub fn run(state: &AppState) -> Result<(), ApiError> {
    let roles = ensure_builtin_roles(&state.store, state.clock.now())?;
    info!(roles = roles.len(), "Built-in roles ready");

    let Some(seed) = &state.config.seed_admin else {
        return Ok(());
    };
    if let Some(existing) = UserRepository::new(&state.store).find_by_email(&seed.email)? {
        info!(user_id = %existing.id, "Seed admin already exists");
        return Ok(());
    }

    let request = CreateUserRequest {
        email: seed.email.clone(),
        first_name: "Portal".to_string(),
        last_name: "Administrator".to_string(),
        password: seed.password.clone(),
        role: Some(ADMIN_ROLE.to_string()),
    };
    let (user, _) = create_account(state, &request, true)?;
    info!(user_id = %user.id, email = %user.email, "Seed admin created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::roles::resolve_role;
    use crate::config::SeedAdmin;
    use crate::state::test_support::test_app;
    use std::sync::Arc;

    #[test]
    fn seeds_roles_and_admin_once() {
        let mut app = test_app();
        let mut config = (*app.state.config).clone();
        config.seed_admin = Some(SeedAdmin {
            email: "Root@Example.com".to_string(),
            password: "Admin12345".to_string(),
        });
        app.state.config = Arc::new(config);

        run(&app.state).unwrap();
        run(&app.state).unwrap();

        let users = UserRepository::new(&app.state.store).list().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].email, "root@example.com");
        assert!(users[0].verified);
        let role = resolve_role(&app.state.store, &users[0].role_id).unwrap().unwrap();
        assert_eq!(role.name, ADMIN_ROLE);
    }

    #[test]
    fn weak_seed_password_is_rejected() {
        let mut app = test_app();
        let mut config = (*app.state.config).clone();
        config.seed_admin = Some(SeedAdmin {
            email: "root@example.com".to_string(),
            password: "short".to_string(),
        });
        app.state.config = Arc::new(config);

        assert!(run(&app.state).is_err());
    }
}
