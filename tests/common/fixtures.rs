//! Sample Cypress sources.

/// A realistic Cypress file: custom command, hook, nested suite, trailing statement.
pub const LOGIN_SPEC: &str = r#"/// <reference types="cypress" />
import { users } from '../fixtures/users';
import 'cypress-file-upload';

Cypress.Commands.add('login', (email, password) => {
  cy.get('#email').type(email);
  cy.get('#password').type(password);
});

describe('Login page', () => {
  beforeEach(() => {
    cy.visit('/login');
  });

  // happy path
  it('logs in', () => {
    cy.login(users[0].email, 'secret');
    cy.url().should('include', '/home');
  });

  context.only('with bad input', () => {
    it('shows an error', () => {
      cy.get('button').click();
    });
  });
});

const timeout = 1000;
"#;

/// Three independent top-level tests.
pub const THREE_TESTS: &str = r#"it('first', () => {
  cy.visit('/one');
});

it('second', () => {
  cy.visit('/two');
});

it('third', () => {
  cy.visit('/three');
});
"#;

/// Unbalanced braces.
pub const MALFORMED_SPEC: &str = "describe('broken', () => {\n  it('never closes', () => {\n    cy.visit('/');\n";
